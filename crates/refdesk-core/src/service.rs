//! The catalog service: read-through caching in front of the store, one
//! cache per route family.
//!
//! Construction is explicit dependency injection. The process composition
//! root builds one [`CatalogService`] at startup and hands it around; there
//! is no ambient singleton. Search pages live in a short-TTL untagged cache
//! (freshness by expiry), paper details and user histories carry owner tags
//! and are dropped eagerly by the write hooks.

use std::fmt;
use std::sync::Arc;

use crate::cache::{CacheStats, ResultCache};
use crate::keys::{CanonicalKey, KeyBuilder, OwnerTag};
use crate::search::{PageRequest, SearchPage, SearchQuery, SearchRanker};
use crate::store::CatalogStore;
use crate::{Config, CoreError, PaperDetail, UserHistory};

pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
    ranker: SearchRanker,
    search_cache: ResultCache<SearchPage>,
    detail_cache: ResultCache<PaperDetail>,
    history_cache: ResultCache<UserHistory>,
}

/// Counter snapshots for all three cache families.
#[derive(Debug, Clone, Copy)]
pub struct ServiceCacheStats {
    pub search: CacheStats,
    pub detail: CacheStats,
    pub history: CacheStats,
}

impl CatalogService {
    pub fn new(store: Arc<dyn CatalogStore>, config: &Config) -> Self {
        tracing::info!(
            search_ttl_secs = config.search_cache.ttl.as_secs(),
            search_capacity = config.search_cache.capacity,
            detail_ttl_secs = config.detail_cache.ttl.as_secs(),
            detail_capacity = config.detail_cache.capacity,
            history_ttl_secs = config.history_cache.ttl.as_secs(),
            history_capacity = config.history_cache.capacity,
            "catalog service ready"
        );
        Self {
            store,
            ranker: SearchRanker,
            search_cache: ResultCache::new(config.search_cache),
            detail_cache: ResultCache::new(config.detail_cache),
            history_cache: ResultCache::new(config.history_cache),
        }
    }

    /// Run a search, serving from the cache when an identical parameter set
    /// was answered recently.
    ///
    /// `query` and `page` are validated at construction, so the only error
    /// path left here is the store itself.
    pub async fn search(
        &self,
        query: &SearchQuery,
        page: PageRequest,
    ) -> Result<Arc<SearchPage>, CoreError> {
        let key = search_key(query, page);
        if let Some(hit) = self.search_cache.get(&key) {
            tracing::trace!(key = key.as_str(), "search cache hit");
            return Ok(hit);
        }
        tracing::trace!(key = key.as_str(), "search cache miss");

        let candidates = self.store.search_candidates(query).await?;
        tracing::debug!(
            candidates = candidates.len(),
            phrase = query.phrase(),
            sort = query.sort.as_str(),
            "ranking search candidates"
        );
        let ranked = self.ranker.rank(query, candidates, page);
        Ok(self.search_cache.put(key, ranked, Vec::new()))
    }

    /// One paper's aggregate detail. Absent papers are never cached, so a
    /// paper created after a failed lookup is visible immediately.
    pub async fn paper_detail(&self, paper_id: u64) -> Result<Option<Arc<PaperDetail>>, CoreError> {
        let key = detail_key(paper_id);
        if let Some(hit) = self.detail_cache.get(&key) {
            tracing::trace!(paper_id, "detail cache hit");
            return Ok(Some(hit));
        }
        let Some(detail) = self.store.paper_detail(paper_id).await? else {
            tracing::trace!(paper_id, "paper not found");
            return Ok(None);
        };
        let tags = vec![OwnerTag::paper(paper_id), OwnerTag::user(detail.submitted_by)];
        Ok(Some(self.detail_cache.put(key, detail, tags)))
    }

    /// The user's most recent downloads, newest first, at most `limit`
    /// entries.
    pub async fn user_history(
        &self,
        user_id: u64,
        limit: usize,
    ) -> Result<Arc<UserHistory>, CoreError> {
        let key = history_key(user_id, limit);
        if let Some(hit) = self.history_cache.get(&key) {
            tracing::trace!(user_id, "history cache hit");
            return Ok(hit);
        }
        let mut downloads = self.store.user_downloads(user_id).await?;
        downloads.sort_by(|a, b| {
            b.downloaded_at
                .cmp(&a.downloaded_at)
                .then_with(|| a.paper_id.cmp(&b.paper_id))
        });
        downloads.truncate(limit);
        let history = UserHistory { user_id, downloads };
        Ok(self
            .history_cache
            .put(key, history, vec![OwnerTag::user(user_id)]))
    }

    /// A new review changed the paper's aggregates and the owner's views.
    /// Returns the number of entries dropped.
    pub fn invalidate_after_review(&self, paper_id: u64, paper_owner: u64) -> usize {
        let mut removed = usize::from(self.detail_cache.invalidate_exact(&detail_key(paper_id)));
        removed += self.invalidate_user(paper_owner);
        tracing::debug!(
            paper_id,
            user_id = paper_owner,
            removed,
            "cache invalidated after review"
        );
        removed
    }

    /// A new download changed the paper's counter and the downloader's
    /// history.
    pub fn invalidate_after_download(&self, paper_id: u64, downloader: u64) -> usize {
        let mut removed = usize::from(self.detail_cache.invalidate_exact(&detail_key(paper_id)));
        removed += self.invalidate_user(downloader);
        tracing::debug!(
            paper_id,
            user_id = downloader,
            removed,
            "cache invalidated after download"
        );
        removed
    }

    /// A new search-log row changed the user's tagged views.
    pub fn invalidate_after_search_log(&self, user_id: u64) -> usize {
        let removed = self.invalidate_user(user_id);
        tracing::debug!(user_id, removed, "cache invalidated after search log");
        removed
    }

    pub fn cache_stats(&self) -> ServiceCacheStats {
        ServiceCacheStats {
            search: self.search_cache.stats(),
            detail: self.detail_cache.stats(),
            history: self.history_cache.stats(),
        }
    }

    fn invalidate_user(&self, user_id: u64) -> usize {
        let tag = OwnerTag::user(user_id);
        self.detail_cache.invalidate(&tag) + self.history_cache.invalidate(&tag)
    }
}

impl fmt::Debug for CatalogService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogService")
            .field("search_cache", &self.search_cache)
            .field("detail_cache", &self.detail_cache)
            .field("history_cache", &self.history_cache)
            .finish_non_exhaustive()
    }
}

fn search_key(query: &SearchQuery, page: PageRequest) -> CanonicalKey {
    KeyBuilder::new("papers.search")
        .param("q", query.phrase())
        .opt_param("field", query.field_id)
        .opt_param("min_rating", query.min_rating)
        .opt_param("from", query.published_from)
        .opt_param("to", query.published_to)
        .param("sort", query.sort)
        .param("page", page.page())
        .param("per_page", page.per_page())
        .build()
}

fn detail_key(paper_id: u64) -> CanonicalKey {
    KeyBuilder::new("papers.detail").param("id", paper_id).build()
}

fn history_key(user_id: u64, limit: usize) -> CanonicalKey {
    KeyBuilder::new("users.history")
        .param("user", user_id)
        .param("limit", limit)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use crate::{AuthorName, DownloadRecord, PaperRecord};
    use chrono::NaiveDate;
    use std::future::Future;
    use std::pin::Pin;

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
                    first_name: "Grace".to_string(),
                    last_name: "Hopper".to_string(),
                }],
                published_on: NaiveDate::from_ymd_opt(2022, 9, 1).unwrap(),
                download_count: 0,
                review_count: 0,
                rating_sum: 0.0,
            },
            submitted_by,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
    }

    fn seeded() -> (Arc<MemoryStore>, CatalogService) {
        let store = Arc::new(MemoryStore::with_papers(vec![
            detail(1, "Neural Networks", 10),
            detail(2, "Graph Algorithms", 20),
            detail(3, "Neural Rendering", 10),
        ]));
        let service = CatalogService::new(store.clone(), &Config::default());
        (store, service)
    }

    fn query(text: &str) -> SearchQuery {
        SearchQuery::parse(text).unwrap()
    }

    fn first_page() -> PageRequest {
        PageRequest::new(1, 10).unwrap()
    }

    // ── Read-through caching ──────────────────────────────────────────

    #[tokio::test]
    async fn second_identical_search_hits_the_cache() {
        let (store, service) = seeded();
        let q = query("neural");
        let first = service.search(&q, first_page()).await.unwrap();
        let second = service.search(&q, first_page()).await.unwrap();

        assert_eq!(store.search_calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.total, 2);

        let stats = service.cache_stats();
        assert_eq!(stats.search.hits, 1);
        assert_eq!(stats.search.misses, 1);
    }

    #[tokio::test]
    async fn different_filters_get_their_own_cache_slots() {
        let (store, service) = seeded();
        let plain = query("neural");
        let mut filtered = query("neural");
        filtered.min_rating = Some(4.0);

        service.search(&plain, first_page()).await.unwrap();
        service.search(&filtered, first_page()).await.unwrap();
        assert_eq!(store.search_calls(), 2);
    }

    #[tokio::test]
    async fn different_pages_get_their_own_cache_slots() {
        let (store, service) = seeded();
        let q = query("neural");
        service
            .search(&q, PageRequest::new(1, 1).unwrap())
            .await
            .unwrap();
        service
            .search(&q, PageRequest::new(2, 1).unwrap())
            .await
            .unwrap();
        assert_eq!(store.search_calls(), 2);
    }

    #[tokio::test]
    async fn detail_reads_are_cached_until_invalidated() {
        let (store, service) = seeded();
        service.paper_detail(1).await.unwrap().unwrap();
        service.paper_detail(1).await.unwrap().unwrap();
        assert_eq!(store.detail_calls(), 1);

        let removed = service.invalidate_after_review(1, 10);
        assert!(removed >= 1);

        service.paper_detail(1).await.unwrap().unwrap();
        assert_eq!(store.detail_calls(), 2);
    }

    #[tokio::test]
    async fn unknown_paper_detail_is_not_cached() {
        let (store, service) = seeded();
        assert!(service.paper_detail(99).await.unwrap().is_none());
        assert!(service.paper_detail(99).await.unwrap().is_none());
        assert_eq!(store.detail_calls(), 2);
    }

    #[tokio::test]
    async fn review_invalidation_is_scoped_to_the_owner() {
        let (store, service) = seeded();
        // Papers 1 and 2 have different submitters; warm both details.
        service.paper_detail(1).await.unwrap().unwrap();
        service.paper_detail(2).await.unwrap().unwrap();
        assert_eq!(store.detail_calls(), 2);

        service.invalidate_after_review(1, 10);

        // Paper 2 belongs to user 20 and must still be served from cache.
        service.paper_detail(2).await.unwrap().unwrap();
        assert_eq!(store.detail_calls(), 2);
        service.paper_detail(1).await.unwrap().unwrap();
        assert_eq!(store.detail_calls(), 3);
    }

    #[tokio::test]
    async fn owner_sweep_catches_the_owners_other_papers() {
        let (store, service) = seeded();
        // Papers 1 and 3 share submitter 10.
        service.paper_detail(1).await.unwrap().unwrap();
        service.paper_detail(3).await.unwrap().unwrap();
        assert_eq!(store.detail_calls(), 2);

        service.invalidate_after_review(1, 10);

        service.paper_detail(3).await.unwrap().unwrap();
        assert_eq!(store.detail_calls(), 3);
    }

    // ── User history ──────────────────────────────────────────────────

    #[tokio::test]
    async fn history_is_sorted_newest_first_and_truncated() {
        let (store, service) = seeded();
        assert!(store.record_download(7, 1, day(1)));
        assert!(store.record_download(7, 2, day(5)));
        assert!(store.record_download(7, 3, day(3)));

        let history = service.user_history(7, 2).await.unwrap();
        assert_eq!(history.user_id, 7);
        assert_eq!(history.downloads.len(), 2);
        assert_eq!(history.downloads[0].paper_id, 2);
        assert_eq!(history.downloads[1].paper_id, 3);
    }

    #[tokio::test]
    async fn download_invalidation_refreshes_the_downloaders_history() {
        let (store, service) = seeded();
        assert!(store.record_download(7, 1, day(1)));
        let before = service.user_history(7, 10).await.unwrap();
        assert_eq!(before.downloads.len(), 1);
        assert_eq!(store.download_calls(), 1);

        assert!(store.record_download(7, 2, day(2)));
        service.invalidate_after_download(2, 7);

        let after = service.user_history(7, 10).await.unwrap();
        assert_eq!(after.downloads.len(), 2);
        assert_eq!(store.download_calls(), 2);
    }

    #[tokio::test]
    async fn search_log_invalidation_leaves_untagged_search_pages_alone() {
        let (store, service) = seeded();
        let q = query("neural");
        service.search(&q, first_page()).await.unwrap();
        assert!(store.record_download(7, 1, day(1)));
        service.user_history(7, 10).await.unwrap();

        service.invalidate_after_search_log(7);

        // Search pages are untagged: still a hit.
        service.search(&q, first_page()).await.unwrap();
        assert_eq!(store.search_calls(), 1);
        // The user's history was tagged: refetched.
        service.user_history(7, 10).await.unwrap();
        assert_eq!(store.download_calls(), 2);
    }

    // ── Store failure propagation ─────────────────────────────────────

    struct FailingStore;

    impl CatalogStore for FailingStore {
        fn search_candidates<'a>(
            &'a self,
            _query: &'a SearchQuery,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<PaperRecord>, StoreError>> + Send + 'a>>
        {
            Box::pin(async { Err(StoreError::Unavailable("backend offline".into())) })
        }

        fn paper_detail<'a>(
            &'a self,
            _paper_id: u64,
        ) -> Pin<Box<dyn Future<Output = Result<Option<PaperDetail>, StoreError>> + Send + 'a>>
        {
            Box::pin(async { Err(StoreError::Unavailable("backend offline".into())) })
        }

        fn user_downloads<'a>(
            &'a self,
            _user_id: u64,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<DownloadRecord>, StoreError>> + Send + 'a>>
        {
            Box::pin(async { Err(StoreError::Unavailable("backend offline".into())) })
        }
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_core_error() {
        let service = CatalogService::new(Arc::new(FailingStore), &Config::default());
        let err = service
            .search(&query("neural"), first_page())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Store(StoreError::Unavailable(_))));
    }
}
