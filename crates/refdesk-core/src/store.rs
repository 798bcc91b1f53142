//! Catalog storage behind the service layer.
//!
//! [`CatalogStore`] is the seam the service talks through; the in-memory
//! [`MemoryStore`] backs the CLI and the test suites. A SQL-backed
//! implementation would live behind the same trait.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use thiserror::Error;

use crate::search::SearchQuery;
use crate::{DownloadRecord, PaperDetail, PaperRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("catalog store unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the paper catalog.
///
/// Implementations may narrow `search_candidates` using the query's filters,
/// but are never required to: the ranker re-applies every filter, so
/// returning a superset of the matching records is always correct.
pub trait CatalogStore: Send + Sync {
    fn search_candidates<'a>(
        &'a self,
        query: &'a SearchQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PaperRecord>, StoreError>> + Send + 'a>>;

    fn paper_detail<'a>(
        &'a self,
        paper_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PaperDetail>, StoreError>> + Send + 'a>>;

    fn user_downloads<'a>(
        &'a self,
        user_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DownloadRecord>, StoreError>> + Send + 'a>>;
}

/// Catalog held entirely in memory.
///
/// Mutations go through the typed helpers so the review aggregates and the
/// download log stay in step with the paper records. Call counters let
/// tests distinguish a cache hit from a store round trip.
pub struct MemoryStore {
    papers: Mutex<Vec<PaperDetail>>,
    downloads: Mutex<Vec<(u64, DownloadRecord)>>,
    search_calls: AtomicUsize,
    detail_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_papers(Vec::new())
    }

    pub fn with_papers(papers: Vec<PaperDetail>) -> Self {
        Self {
            papers: Mutex::new(papers),
            downloads: Mutex::new(Vec::new()),
            search_calls: AtomicUsize::new(0),
            detail_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }

    pub fn insert_paper(&self, detail: PaperDetail) {
        self.lock_papers().push(detail);
    }

    /// Fold one review into the paper's aggregates. Returns false when the
    /// paper does not exist.
    pub fn record_review(&self, paper_id: u64, rating: f64) -> bool {
        let mut papers = self.lock_papers();
        match papers.iter_mut().find(|p| p.record.id == paper_id) {
            Some(paper) => {
                paper.record.review_count += 1;
                paper.record.rating_sum += rating;
                true
            }
            None => false,
        }
    }

    /// Log one download: bumps the paper's counter and appends to the
    /// user's history. Returns false when the paper does not exist.
    pub fn record_download(&self, user_id: u64, paper_id: u64, on: NaiveDate) -> bool {
        let mut papers = self.lock_papers();
        let Some(paper) = papers.iter_mut().find(|p| p.record.id == paper_id) else {
            return false;
        };
        paper.record.download_count += 1;
        let entry = DownloadRecord {
            paper_id,
            paper_title: paper.record.title.clone(),
            downloaded_at: on,
        };
        drop(papers);
        self.lock_downloads().push((user_id, entry));
        true
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    fn lock_papers(&self) -> MutexGuard<'_, Vec<PaperDetail>> {
        match self.papers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_downloads(&self) -> MutexGuard<'_, Vec<(u64, DownloadRecord)>> {
        match self.downloads.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogStore for MemoryStore {
    fn search_candidates<'a>(
        &'a self,
        _query: &'a SearchQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PaperRecord>, StoreError>> + Send + 'a>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let papers = self.lock_papers();
            Ok(papers.iter().map(|detail| detail.record.clone()).collect())
        })
    }

    fn paper_detail<'a>(
        &'a self,
        paper_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PaperDetail>, StoreError>> + Send + 'a>> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let papers = self.lock_papers();
            Ok(papers.iter().find(|p| p.record.id == paper_id).cloned())
        })
    }

    fn user_downloads<'a>(
        &'a self,
        user_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DownloadRecord>, StoreError>> + Send + 'a>> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let downloads = self.lock_downloads();
            Ok(downloads
                .iter()
                .filter(|(owner, _)| *owner == user_id)
                .map(|(_, record)| record.clone())
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuthorName;

    fn detail(id: u64, title: &str, submitted_by: u64) -> PaperDetail {
        PaperDetail {
            record: PaperRecord {
                id,
                title: title.to_string(),
                abstract_text: String::new(),
                keywords: String::new(),
                field_id: 1,
                field_name: "Machine Learning".to_string(),
                field_description: String::new(),
                authors: vec![AuthorName {
                    first_name: "Ada".to_string(),
                    last_name: "Lovelace".to_string(),
                }],
                published_on: NaiveDate::from_ymd_opt(2021, 5, 4).unwrap(),
                download_count: 0,
                review_count: 0,
                rating_sum: 0.0,
            },
            submitted_by,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[tokio::test]
    async fn search_candidates_returns_every_record() {
        let store = MemoryStore::with_papers(vec![detail(1, "One", 10), detail(2, "Two", 11)]);
        let query = SearchQuery::parse("anything").unwrap();
        let candidates = store.search_candidates(&query).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(store.search_calls(), 1);
    }

    #[tokio::test]
    async fn paper_detail_finds_by_id() {
        let store = MemoryStore::with_papers(vec![detail(7, "Seven", 3)]);
        let found = store.paper_detail(7).await.unwrap();
        assert_eq!(found.unwrap().record.title, "Seven");
        let missing = store.paper_detail(8).await.unwrap();
        assert!(missing.is_none());
        assert_eq!(store.detail_calls(), 2);
    }

    #[tokio::test]
    async fn user_downloads_are_scoped_to_the_user() {
        let store = MemoryStore::with_papers(vec![detail(1, "One", 10), detail(2, "Two", 10)]);
        assert!(store.record_download(100, 1, day(1)));
        assert!(store.record_download(200, 2, day(2)));
        assert!(store.record_download(100, 2, day(3)));

        let history = store.user_downloads(100).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|d| d.paper_id == 1 || d.paper_id == 2));
        let other = store.user_downloads(200).await.unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(store.download_calls(), 2);
    }

    #[tokio::test]
    async fn record_review_updates_the_aggregates() {
        let store = MemoryStore::with_papers(vec![detail(1, "One", 10)]);
        assert!(store.record_review(1, 4.0));
        assert!(store.record_review(1, 5.0));
        let paper = store.paper_detail(1).await.unwrap().unwrap();
        assert_eq!(paper.record.review_count, 2);
        assert!((paper.record.average_rating() - 4.5).abs() < f64::EPSILON);
    }

    #[test]
    fn record_review_for_unknown_paper_is_rejected() {
        let store = MemoryStore::new();
        assert!(!store.record_review(99, 5.0));
    }

    #[tokio::test]
    async fn record_download_bumps_counter_and_stamps_title() {
        let store = MemoryStore::with_papers(vec![detail(1, "Attention Is All You Need", 10)]);
        assert!(store.record_download(100, 1, day(5)));

        let paper = store.paper_detail(1).await.unwrap().unwrap();
        assert_eq!(paper.record.download_count, 1);

        let history = store.user_downloads(100).await.unwrap();
        assert_eq!(history[0].paper_title, "Attention Is All You Need");
        assert_eq!(history[0].downloaded_at, day(5));
    }

    #[test]
    fn record_download_for_unknown_paper_is_rejected() {
        let store = MemoryStore::new();
        assert!(!store.record_download(100, 42, day(1)));
    }
}
