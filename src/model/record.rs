//! Candidate references, extracted project fields and sealed records

use crate::model::ProjectStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Maximum number of entries in a record's extension area
pub const MAX_EXTENSIONS: usize = 16;

/// A project link found on a listing page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRef {
    pub url: String,
    pub external_id: String,
    pub title: String,
    pub thumbnail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Funding {
    pub raised: f64,
    pub target: f64,
    pub percent: f64,
    pub backer_count: u64,

    /// Target was computed from `raised / percent` instead of read from the page
    pub target_derived: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub uid: String,
    pub homepage: String,
    pub avatar: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub reward_count: u64,
    pub update_count: u64,
    pub comment_count: u64,
    pub like_count: u64,
    pub images: Vec<String>,
    pub videos: Vec<String>,
}

/// Bounded string map for status-dependent optional fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extensions(BTreeMap<String, String>);

impl Extensions {
    /// Inserts or replaces an entry; returns false if the area is full
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.0.len() >= MAX_EXTENSIONS && !self.0.contains_key(&key) {
            return false;
        }
        self.0.insert(key, value.into());
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// Everything an extractor pulls out of one detail page
///
/// Empty strings mean the value was not present on the page. Funding values
/// default to zero rather than being absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectFields {
    pub external_id: String,
    pub url: String,
    pub title: String,
    pub thumbnail: String,
    pub category: String,
    pub status: ProjectStatus,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub funding: Funding,
    pub author: Author,
    pub content: Content,
    pub extensions: Extensions,
}

/// Immutable snapshot of one project at one point in time
///
/// Built only through [`Record::seal`], which stamps the fetch time and computes
/// the content hash over the fields. There is no way to mutate a sealed record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    fields: ProjectFields,
    content_hash: String,
    fetched_at: DateTime<Utc>,
}

impl Record {
    pub fn seal(fields: ProjectFields, fetched_at: DateTime<Utc>) -> Self {
        let content_hash = content_hash(&fields);
        Self {
            fields,
            content_hash,
            fetched_at,
        }
    }

    pub fn fields(&self) -> &ProjectFields {
        &self.fields
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn external_id(&self) -> &str {
        &self.fields.external_id
    }

    pub fn status(&self) -> ProjectStatus {
        self.fields.status
    }
}

/// Hex SHA-256 over the canonical projection of `fields`
///
/// Funding floats are rendered with two decimals, the smallest currency unit the
/// site shows. A change of a whole cent or more changes the hash; a difference
/// below half a cent does not, so float noise never creates a new version.
/// Thumbnails, avatar/homepage, media lists and extensions are not part of the
/// projection.
pub fn content_hash(fields: &ProjectFields) -> String {
    let f = &fields.funding;
    let c = &fields.content;
    let projection = [
        fields.external_id.clone(),
        fields.url.clone(),
        fields.title.clone(),
        fields.category.clone(),
        fields.status.to_db_string().to_string(),
        fields.start_time.clone().unwrap_or_default(),
        fields.end_time.clone().unwrap_or_default(),
        format!("{:.2}", f.raised),
        format!("{:.2}", f.target),
        format!("{:.2}", f.percent),
        f.backer_count.to_string(),
        f.target_derived.to_string(),
        fields.author.name.clone(),
        fields.author.uid.clone(),
        c.reward_count.to_string(),
        c.update_count.to_string(),
        c.comment_count.to_string(),
        c.like_count.to_string(),
    ]
    .join("\u{1f}");

    let mut hasher = Sha256::new();
    hasher.update(projection.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fields() -> ProjectFields {
        ProjectFields {
            external_id: "12345".to_string(),
            url: "https://zhongchou.modian.com/item/12345.html".to_string(),
            title: "Board game reprint".to_string(),
            category: "tablegames".to_string(),
            status: ProjectStatus::Active,
            start_time: Some("2024-01-01 10:00".to_string()),
            end_time: Some("2024-02-01 10:00".to_string()),
            funding: Funding {
                raised: 600.0,
                target: 1000.0,
                percent: 60.0,
                backer_count: 12,
                target_derived: false,
            },
            author: Author {
                name: "studio".to_string(),
                uid: "998".to_string(),
                ..Author::default()
            },
            ..ProjectFields::default()
        }
    }

    #[test]
    fn test_equal_projections_hash_equally() {
        let now = Utc::now();
        let a = Record::seal(sample_fields(), now);
        let b = Record::seal(sample_fields(), now + chrono::Duration::hours(1));
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn test_funding_change_changes_hash() {
        let base = content_hash(&sample_fields());

        let mut raised = sample_fields();
        raised.funding.raised = 601.0;
        assert_ne!(content_hash(&raised), base);

        let mut backers = sample_fields();
        backers.funding.backer_count = 13;
        assert_ne!(content_hash(&backers), base);

        let mut percent = sample_fields();
        percent.funding.percent = 60.5;
        assert_ne!(content_hash(&percent), base);
    }

    #[test]
    fn test_float_precision_is_fixed() {
        let mut a = sample_fields();
        a.funding.raised = 600.001;
        assert_eq!(content_hash(&a), content_hash(&sample_fields()));

        let mut cent = sample_fields();
        cent.funding.raised = 600.01;
        assert_ne!(content_hash(&cent), content_hash(&sample_fields()));
    }

    #[test]
    fn test_unprojected_fields_do_not_change_hash() {
        let mut fields = sample_fields();
        fields.thumbnail = "https://img.example.com/a.jpg".to_string();
        fields.extensions.insert("subtitle", "second edition");
        assert_eq!(content_hash(&fields), content_hash(&sample_fields()));
    }

    #[test]
    fn test_extensions_are_bounded() {
        let mut ext = Extensions::default();
        for i in 0..MAX_EXTENSIONS {
            assert!(ext.insert(format!("k{}", i), "v"));
        }
        assert!(!ext.insert("overflow", "v"));
        assert!(ext.insert("k0", "replaced"));
        assert_eq!(ext.len(), MAX_EXTENSIONS);
        assert_eq!(ext.get("k0"), Some("replaced"));
    }
}
