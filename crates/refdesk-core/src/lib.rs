use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cache;
pub mod config_file;
pub mod keys;
pub mod search;
pub mod service;
pub mod store;

// Re-export for convenience
pub use cache::{CachePolicy, CacheStats, ResultCache};
pub use keys::{CanonicalKey, KeyBuilder, OwnerTag};
pub use search::{
    PageRequest, QueryError, ScoredRecord, SearchPage, SearchQuery, SearchRanker, SortMode,
};
pub use service::{CatalogService, ServiceCacheStats};
pub use store::{CatalogStore, MemoryStore, StoreError};

/// One author's name as joined onto a candidate row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorName {
    pub first_name: String,
    pub last_name: String,
}

/// A candidate row for search: the paper plus everything the ranker reads.
/// The data-access collaborator joins the author list, the keyword string,
/// and the review aggregates before handing records to this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperRecord {
    pub id: u64,
    pub title: String,
    pub abstract_text: String,
    /// Comma-separated keyword string as stored on the paper row.
    pub keywords: String,
    pub field_id: u64,
    pub field_name: String,
    pub field_description: String,
    pub authors: Vec<AuthorName>,
    pub published_on: NaiveDate,
    pub download_count: u64,
    pub review_count: u64,
    pub rating_sum: f64,
}

impl PaperRecord {
    /// Average review rating, derived at evaluation time. 0.0 when the
    /// paper has no reviews.
    pub fn average_rating(&self) -> f64 {
        if self.review_count == 0 {
            0.0
        } else {
            self.rating_sum / self.review_count as f64
        }
    }
}

/// A paper's aggregate detail view, including who submitted it (the owner
/// whose writes invalidate it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperDetail {
    #[serde(flatten)]
    pub record: PaperRecord,
    pub submitted_by: u64,
}

/// One row of a user's download history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub paper_id: u64,
    pub paper_title: String,
    pub downloaded_at: NaiveDate,
}

/// A user's recent downloads, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserHistory {
    pub user_id: u64,
    pub downloads: Vec<DownloadRecord>,
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("query error: {0}")]
    Query(#[from] QueryError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Runtime configuration for the catalog service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Search pages: hot aggregate data, short TTL.
    pub search_cache: CachePolicy,
    /// Paper details: invalidated eagerly on writes, so a longer TTL holds.
    pub detail_cache: CachePolicy,
    /// Per-user history: the longest TTL of the three.
    pub history_cache: CachePolicy,
    pub default_page_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search_cache: CachePolicy::new(Duration::from_secs(60), 100),
            detail_cache: CachePolicy::new(Duration::from_secs(300), 500),
            history_cache: CachePolicy::new(Duration::from_secs(900), 200),
            default_page_size: PageRequest::DEFAULT_PER_PAGE,
        }
    }
}

/// Resolve the effective runtime configuration: defaults overlaid with any
/// on-disk config file (platform path, then a CWD `.refdesk.toml`).
pub fn load_runtime_config() -> Config {
    config_file::apply(&config_file::load_config(), Config::default())
}

#[cfg(test)]
mod domain_tests {
    use super::*;

    fn record() -> PaperRecord {
        PaperRecord {
            id: 1,
            title: "Neural Networks".to_string(),
            abstract_text: String::new(),
            keywords: String::new(),
            field_id: 1,
            field_name: "Machine Learning".to_string(),
            field_description: String::new(),
            authors: Vec::new(),
            published_on: NaiveDate::from_ymd_opt(2020, 6, 1).unwrap(),
            download_count: 0,
            review_count: 0,
            rating_sum: 0.0,
        }
    }

    #[test]
    fn average_rating_is_zero_with_no_reviews() {
        assert_eq!(record().average_rating(), 0.0);
    }

    #[test]
    fn average_rating_divides_sum_by_count() {
        let mut paper = record();
        paper.review_count = 4;
        paper.rating_sum = 18.0;
        assert!((paper.average_rating() - 4.5).abs() < f64::EPSILON);
    }

    #[test]
    fn paper_detail_serializes_flat() {
        let detail = PaperDetail {
            record: record(),
            submitted_by: 9,
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["title"], "Neural Networks");
        assert_eq!(json["submitted_by"], 9);
        assert_eq!(json["published_on"], "2020-06-01");
    }

    #[test]
    fn default_config_staggers_ttls_per_family() {
        let config = Config::default();
        assert!(config.search_cache.ttl < config.detail_cache.ttl);
        assert!(config.detail_cache.ttl < config.history_cache.ttl);
        assert_eq!(config.default_page_size, 10);
    }
}
