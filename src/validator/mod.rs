//! Record validation
//!
//! Field rules plus cross-field consistency checks. Errors make a record invalid
//! (it is quarantined instead of persisted); warnings only lower its score.
//!
//! `score = max(0, 100 - 10 * errors - 2 * warnings)`

mod rules;

pub use rules::{Field, FieldRule, Finding, Format};

use crate::config::ValidatorConfig;
use crate::model::{ProjectFields, Record};
use regex::Regex;
use std::collections::HashMap;

const DATETIME_PATTERN: &str = r"^\d{4}-\d{2}-\d{2}( \d{2}:\d{2}(:\d{2})?)?$";
const EXTERNAL_ID_PATTERN: &str = r"^\d+$";
const TOP_ERRORS: usize = 5;

/// Outcome of validating one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub score: u32,
}

impl ValidationResult {
    fn from_findings(findings: Vec<Finding>) -> Self {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for finding in findings {
            match finding {
                Finding::Error(e) => errors.push(e),
                Finding::Warning(w) => warnings.push(w),
            }
        }
        let penalty = 10 * errors.len() + 2 * warnings.len();
        Self {
            is_valid: errors.is_empty(),
            score: 100usize.saturating_sub(penalty) as u32,
            errors,
            warnings,
        }
    }
}

/// Aggregate over a batch of validations
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub average_score: f64,
    /// Most frequent error messages with their counts, most frequent first
    pub top_errors: Vec<(String, usize)>,
}

impl BatchSummary {
    pub fn valid_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.valid as f64 / self.total as f64 * 100.0
        }
    }
}

/// Applies field rules and cross-field checks to records
#[derive(Debug, Clone)]
pub struct DataValidator {
    rules: Vec<FieldRule>,
    datetime: Regex,
    consistency_tolerance: f64,
}

impl DataValidator {
    pub fn new(config: &ValidatorConfig) -> Result<Self, regex::Error> {
        let rules = vec![
            FieldRule::new(Field::ExternalId)
                .required()
                .pattern(Regex::new(EXTERNAL_ID_PATTERN)?),
            FieldRule::new(Field::Url).required().format(Format::Url),
            FieldRule::new(Field::Title)
                .required()
                .length(config.min_title_length, config.max_title_length)
                .forbidden(config.forbidden_keywords.clone()),
            FieldRule::new(Field::Category).length(1, 50),
            FieldRule::new(Field::StartTime).format(Format::DateTime),
            FieldRule::new(Field::EndTime).format(Format::DateTime),
            FieldRule::new(Field::Raised).format(Format::Number),
            FieldRule::new(Field::Target).format(Format::Number),
            FieldRule::new(Field::Percent).format(Format::Percentage),
            FieldRule::new(Field::BackerCount).format(Format::Integer),
            FieldRule::new(Field::AuthorName).required().length(1, 100),
            FieldRule::new(Field::AuthorHomepage).format(Format::Url),
        ];

        Self::with_rules(rules, config.consistency_tolerance)
    }

    /// Builds a validator from an explicit rule set
    pub fn with_rules(
        rules: Vec<FieldRule>,
        consistency_tolerance: f64,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            rules,
            datetime: Regex::new(DATETIME_PATTERN)?,
            consistency_tolerance,
        })
    }

    pub fn validate(&self, record: &Record) -> ValidationResult {
        self.validate_fields(record.fields())
    }

    pub fn validate_fields(&self, fields: &ProjectFields) -> ValidationResult {
        let mut findings: Vec<Finding> = self
            .rules
            .iter()
            .flat_map(|rule| rule.check(fields, &self.datetime))
            .collect();
        findings.extend(self.cross_field(fields));
        ValidationResult::from_findings(findings)
    }

    pub fn validate_batch(&self, records: &[Record]) -> BatchSummary {
        let mut valid = 0;
        let mut score_sum = 0u64;
        let mut error_counts: HashMap<String, usize> = HashMap::new();

        for record in records {
            let result = self.validate(record);
            if result.is_valid {
                valid += 1;
            }
            score_sum += result.score as u64;
            for error in result.errors {
                *error_counts.entry(error).or_insert(0) += 1;
            }
        }

        let mut top_errors: Vec<(String, usize)> = error_counts.into_iter().collect();
        top_errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_errors.truncate(TOP_ERRORS);

        let total = records.len();
        BatchSummary {
            total,
            valid,
            invalid: total - valid,
            average_score: if total == 0 {
                0.0
            } else {
                score_sum as f64 / total as f64
            },
            top_errors,
        }
    }

    fn cross_field(&self, fields: &ProjectFields) -> Vec<Finding> {
        let mut findings = Vec::new();
        let funding = &fields.funding;

        if funding.target > 0.0 && !funding.target_derived {
            let computed = funding.raised / funding.target * 100.0;
            if (computed - funding.percent).abs() > self.consistency_tolerance {
                findings.push(Finding::Warning(format!(
                    "percent {:.2} inconsistent with raised/target ({:.2})",
                    funding.percent, computed
                )));
            }
        }

        if funding.raised < 0.0 {
            findings.push(Finding::Error(format!(
                "amount anomaly: raised is negative ({:.2})",
                funding.raised
            )));
        }

        if fields.status.carries_target() && funding.target <= 0.0 {
            findings.push(Finding::Error(format!(
                "amount anomaly: target must be positive for {} projects",
                fields.status
            )));
        }

        if let Some(id) = identifier_from_url(&fields.url) {
            if !fields.external_id.is_empty() && id != fields.external_id {
                findings.push(Finding::Error(format!(
                    "external_id '{}' does not match url identifier '{}'",
                    fields.external_id, id
                )));
            }
        }

        findings
    }
}

/// Last path segment of `url` with its extension removed
fn identifier_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let stem = segment.split('.').next().unwrap_or(segment);
    (!stem.is_empty()).then(|| stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Author, Funding, ProjectStatus};
    use chrono::Utc;

    fn validator() -> DataValidator {
        DataValidator::new(&ValidatorConfig::default()).unwrap()
    }

    fn clean_fields() -> ProjectFields {
        ProjectFields {
            external_id: "12345".to_string(),
            url: "https://zhongchou.modian.com/item/12345.html".to_string(),
            title: "Mechanical keyboard".to_string(),
            category: "科技".to_string(),
            status: ProjectStatus::Active,
            start_time: Some("2024-01-01 10:00".to_string()),
            end_time: Some("2024-02-01 10:00".to_string()),
            funding: Funding {
                raised: 600.0,
                target: 1000.0,
                percent: 60.0,
                backer_count: 5,
                target_derived: false,
            },
            author: Author {
                name: "keys".to_string(),
                ..Author::default()
            },
            ..ProjectFields::default()
        }
    }

    #[test]
    fn test_clean_record_scores_100() {
        let record = Record::seal(clean_fields(), Utc::now());
        let result = validator().validate(&record);
        assert!(result.is_valid, "{:?}", result);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
        assert_eq!(result.score, 100);
    }

    #[test]
    fn test_inconsistent_percent_is_single_warning() {
        let mut fields = clean_fields();
        fields.funding.percent = 10.0;
        let result = validator().validate_fields(&fields);

        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.score, 98);
    }

    #[test]
    fn test_derived_target_skips_consistency() {
        let mut fields = clean_fields();
        fields.funding.percent = 10.0;
        fields.funding.target_derived = true;
        assert!(validator().validate_fields(&fields).warnings.is_empty());
    }

    #[test]
    fn test_missing_required_field_is_invalid() {
        let mut fields = clean_fields();
        fields.title.clear();
        let result = validator().validate_fields(&fields);
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec!["title is required".to_string()]);
        assert_eq!(result.score, 90);
    }

    #[test]
    fn test_amount_anomalies() {
        let mut negative = clean_fields();
        negative.funding.raised = -1.0;
        negative.funding.percent = 0.0;
        assert!(!validator().validate_fields(&negative).is_valid);

        let mut no_target = clean_fields();
        no_target.funding.target = 0.0;
        assert!(!validator().validate_fields(&no_target).is_valid);

        let mut preheat = clean_fields();
        preheat.status = ProjectStatus::Preheat;
        preheat.funding = Funding::default();
        assert!(validator().validate_fields(&preheat).is_valid);
    }

    #[test]
    fn test_url_identifier_mismatch() {
        let mut fields = clean_fields();
        fields.url = "https://zhongchou.modian.com/item/99999.html".to_string();
        let result = validator().validate_fields(&fields);
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("does not match url identifier"));
    }

    #[test]
    fn test_warnings_for_long_title_and_bad_datetime() {
        let mut fields = clean_fields();
        fields.title = "x".repeat(201);
        fields.end_time = Some("预热中".to_string());
        let result = validator().validate_fields(&fields);
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 2);
        assert_eq!(result.score, 96);
    }

    #[test]
    fn test_score_floor_is_zero() {
        let result = ValidationResult::from_findings(
            (0..11).map(|i| Finding::Error(format!("e{}", i))).collect(),
        );
        assert_eq!(result.score, 0);
    }

    #[test]
    fn test_validate_batch_summary() {
        let now = Utc::now();
        let mut no_author = clean_fields();
        no_author.author.name.clear();
        let mut also_no_author = clean_fields();
        also_no_author.author.name.clear();
        also_no_author.title.clear();

        let records = vec![
            Record::seal(clean_fields(), now),
            Record::seal(no_author, now),
            Record::seal(also_no_author, now),
        ];
        let summary = validator().validate_batch(&records);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.valid, 1);
        assert_eq!(summary.invalid, 2);
        assert_eq!(summary.average_score, (100.0 + 90.0 + 80.0) / 3.0);
        assert_eq!(summary.top_errors[0], ("author_name is required".to_string(), 2));
    }

    #[test]
    fn test_identifier_from_url() {
        assert_eq!(
            identifier_from_url("https://zhongchou.modian.com/item/42.html").as_deref(),
            Some("42")
        );
        assert_eq!(identifier_from_url("http://127.0.0.1:9/item/7.html/").as_deref(), Some("7"));
        assert_eq!(identifier_from_url("not a url"), None);
    }
}
