//! Declarative per-field rules

use crate::model::ProjectFields;
use regex::Regex;
use std::fmt;
use url::Url;

/// Record fields a rule can address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    ExternalId,
    Url,
    Title,
    Category,
    StartTime,
    EndTime,
    Raised,
    Target,
    Percent,
    BackerCount,
    AuthorName,
    AuthorHomepage,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExternalId => "external_id",
            Self::Url => "url",
            Self::Title => "title",
            Self::Category => "category",
            Self::StartTime => "start_time",
            Self::EndTime => "end_time",
            Self::Raised => "raised",
            Self::Target => "target",
            Self::Percent => "percent",
            Self::BackerCount => "backer_count",
            Self::AuthorName => "author_name",
            Self::AuthorHomepage => "author_homepage",
        }
    }

    /// Textual value of the field; None when absent or empty
    pub fn value(&self, fields: &ProjectFields) -> Option<String> {
        let text = match self {
            Self::ExternalId => fields.external_id.clone(),
            Self::Url => fields.url.clone(),
            Self::Title => fields.title.clone(),
            Self::Category => fields.category.clone(),
            Self::StartTime => fields.start_time.clone().unwrap_or_default(),
            Self::EndTime => fields.end_time.clone().unwrap_or_default(),
            Self::Raised => fields.funding.raised.to_string(),
            Self::Target => fields.funding.target.to_string(),
            Self::Percent => fields.funding.percent.to_string(),
            Self::BackerCount => fields.funding.backer_count.to_string(),
            Self::AuthorName => fields.author.name.clone(),
            Self::AuthorHomepage => fields.author.homepage.clone(),
        };
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value formats a field can be checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Url,
    Number,
    Integer,
    /// Number in `0..=1000`
    Percentage,
    /// `YYYY-MM-DD`, optionally followed by `HH:MM` or `HH:MM:SS`
    DateTime,
}

/// Problem found by a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    Error(String),
    Warning(String),
}

/// Constraints on one field
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub field: Field,
    pub required: bool,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Regex>,
    pub format: Option<Format>,
    pub forbidden: Vec<String>,
}

impl FieldRule {
    pub fn new(field: Field) -> Self {
        Self {
            field,
            required: false,
            min_length: None,
            max_length: None,
            pattern: None,
            format: None,
            forbidden: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn forbidden(mut self, substrings: Vec<String>) -> Self {
        self.forbidden = substrings;
        self
    }

    /// Applies the rule; `datetime` is the compiled date pattern shared by all rules
    pub fn check(&self, fields: &ProjectFields, datetime: &Regex) -> Vec<Finding> {
        let name = self.field.name();
        let Some(value) = self.field.value(fields) else {
            return if self.required {
                vec![Finding::Error(format!("{} is required", name))]
            } else {
                Vec::new()
            };
        };

        let mut findings = Vec::new();
        let length = value.chars().count();

        if let Some(min) = self.min_length {
            if length < min {
                findings.push(Finding::Error(format!(
                    "{} is too short ({} < {})",
                    name, length, min
                )));
            }
        }

        if let Some(max) = self.max_length {
            if length > max {
                findings.push(Finding::Warning(format!(
                    "{} is too long ({} > {})",
                    name, length, max
                )));
            }
        }

        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(&value) {
                findings.push(Finding::Error(format!(
                    "{} does not match pattern {}",
                    name,
                    pattern.as_str()
                )));
            }
        }

        if let Some(format) = self.format {
            if let Some(finding) = check_format(name, &value, format, datetime) {
                findings.push(finding);
            }
        }

        for word in &self.forbidden {
            if value.contains(word.as_str()) {
                findings.push(Finding::Warning(format!(
                    "{} contains forbidden keyword '{}'",
                    name, word
                )));
            }
        }

        findings
    }
}

fn check_format(name: &str, value: &str, format: Format, datetime: &Regex) -> Option<Finding> {
    match format {
        Format::Url => match Url::parse(value) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => None,
            _ => Some(Finding::Error(format!("{} is not a valid URL", name))),
        },
        Format::Number => match value.parse::<f64>() {
            Ok(n) if n.is_finite() => None,
            _ => Some(Finding::Error(format!("{} is not a number", name))),
        },
        Format::Integer => match value.parse::<i64>() {
            Ok(_) => None,
            Err(_) => Some(Finding::Error(format!("{} is not an integer", name))),
        },
        Format::Percentage => match value.parse::<f64>() {
            Ok(n) if (0.0..=1000.0).contains(&n) => None,
            _ => Some(Finding::Error(format!(
                "{} is not a percentage in 0..=1000",
                name
            ))),
        },
        Format::DateTime => {
            if datetime.is_match(value) {
                None
            } else {
                Some(Finding::Warning(format!(
                    "{} has unexpected datetime format '{}'",
                    name, value
                )))
            }
        }
    }
}
