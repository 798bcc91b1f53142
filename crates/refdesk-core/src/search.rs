//! Free-text search over paper metadata: matching, scoring, ordering, and
//! pagination.
//!
//! Matching is plain case-insensitive substring comparison against live
//! records; there is no precomputed index. Scores are sums of fixed-weight
//! signals, each contributing its full weight or nothing, so equal inputs
//! always produce equal scores. Every sort mode ends in a record-id
//! tie-break, which keeps pagination stable across repeated queries.

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::PaperRecord;

/// Full query phrase found in the title.
const TITLE_PHRASE_WEIGHT: u32 = 1000;
/// Each individual query term found in the title.
const TITLE_TERM_WEIGHT: u32 = 100;
/// Full query phrase found in the keyword string.
const KEYWORD_PHRASE_WEIGHT: u32 = 500;
/// Full query phrase found in an author's first or last name.
const AUTHOR_PHRASE_WEIGHT: u32 = 300;
/// Any query term found in the abstract.
const ABSTRACT_TERM_WEIGHT: u32 = 200;
/// Full query phrase found in the field name.
const FIELD_PHRASE_WEIGHT: u32 = 150;

/// Rejected search input.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("search query must not be empty")]
    EmptyQuery,
    #[error("invalid pagination: page and per-page start at 1 (got page {page}, per_page {per_page})")]
    InvalidPagination { page: u32, per_page: u32 },
}

/// How search results are ordered. Every mode is fully deterministic; see
/// the comparator for the exact tie-break chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    #[default]
    Relevance,
    Date,
    Rating,
    Downloads,
}

impl SortMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::Relevance => "relevance",
            SortMode::Date => "date",
            SortMode::Rating => "rating",
            SortMode::Downloads => "downloads",
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed free-text query with its filters and sort mode.
///
/// The phrase is the trimmed, lowercased input; terms are its whitespace
/// tokens. Both are fixed at parse time so the ranker and the cache key
/// always see the same text.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    phrase: String,
    terms: Vec<String>,
    /// Restrict to papers in one field.
    pub field_id: Option<u64>,
    /// Keep only papers whose average review rating reaches this floor.
    pub min_rating: Option<f64>,
    /// Inclusive lower bound on publication date.
    pub published_from: Option<NaiveDate>,
    /// Inclusive upper bound on publication date.
    pub published_to: Option<NaiveDate>,
    pub sort: SortMode,
}

impl SearchQuery {
    /// Parse free-text input. Empty or whitespace-only input is rejected;
    /// an empty query must surface as an error, never as an empty result
    /// page.
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        let phrase = trimmed.to_lowercase();
        let terms = phrase.split_whitespace().map(str::to_string).collect();
        Ok(Self {
            phrase,
            terms,
            field_id: None,
            min_rating: None,
            published_from: None,
            published_to: None,
            sort: SortMode::default(),
        })
    }

    /// The trimmed, lowercased query text.
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// The lowercased whitespace-split tokens of the phrase, in input order.
    pub fn terms(&self) -> &[String] {
        &self.terms
    }
}

/// A validated 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    per_page: u32,
}

impl PageRequest {
    pub const DEFAULT_PER_PAGE: u32 = 10;

    /// Both `page` and `per_page` are 1-based; zero in either position is
    /// rejected rather than clamped.
    pub fn new(page: u32, per_page: u32) -> Result<Self, QueryError> {
        if page == 0 || per_page == 0 {
            return Err(QueryError::InvalidPagination { page, per_page });
        }
        Ok(Self { page, per_page })
    }

    /// Fill in the documented defaults (page 1, ten per page) for absent
    /// values; supplied values are still validated.
    pub fn normalized(page: Option<u32>, per_page: Option<u32>) -> Result<Self, QueryError> {
        Self::new(page.unwrap_or(1), per_page.unwrap_or(Self::DEFAULT_PER_PAGE))
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    /// Index of the first record on this page in the full ordered set.
    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.per_page as usize
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: Self::DEFAULT_PER_PAGE,
        }
    }
}

/// One matched record with its computed signals. Never persisted; recomputed
/// on every cache miss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: PaperRecord,
    pub relevance_score: u32,
    /// Computed from the review aggregates at evaluation time; 0.0 for
    /// papers with no reviews.
    pub average_rating: f64,
}

/// One page of an ordered result set, plus the total match count the
/// pagination math needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage {
    pub records: Vec<ScoredRecord>,
    /// Total matches across all pages.
    pub total: usize,
    pub page: u32,
    pub per_page: u32,
}

impl SearchPage {
    pub fn total_pages(&self) -> u32 {
        if self.per_page == 0 {
            return 0;
        }
        self.total.div_ceil(self.per_page as usize) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Deterministic multi-factor relevance ranking.
///
/// Stateless; one instance can evaluate any number of queries. A record is
/// eligible when any query term occurs (case-insensitively) in any of its
/// searchable surfaces: title, abstract, keyword string, field name, field
/// description, or an author's first or last name. Eligible records are
/// scored by summing independent signals:
///
/// - full phrase in title: 1000, plus 100 per term found in the title
/// - full phrase in keyword string: 500
/// - full phrase in an author name: 300
/// - any term in the abstract: 200
/// - full phrase in the field name: 150
///
/// Filters (field, rating floor, date range) apply after matching and
/// before ordering; the rating floor is inclusive.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchRanker;

impl SearchRanker {
    /// Match, filter, score, order, and slice one page of results.
    ///
    /// Idempotent: the same query over the same candidates yields the same
    /// page regardless of candidate input order.
    pub fn rank(
        &self,
        query: &SearchQuery,
        candidates: Vec<PaperRecord>,
        page: PageRequest,
    ) -> SearchPage {
        let mut matched: Vec<ScoredRecord> = candidates
            .into_iter()
            .filter_map(|record| self.evaluate(query, record))
            .collect();
        matched.sort_by(|a, b| compare(query.sort, a, b));

        let total = matched.len();
        let records: Vec<ScoredRecord> = matched
            .into_iter()
            .skip(page.offset())
            .take(page.per_page() as usize)
            .collect();
        SearchPage {
            records,
            total,
            page: page.page(),
            per_page: page.per_page(),
        }
    }

    /// Score one candidate, or `None` if it does not match or is filtered
    /// out.
    fn evaluate(&self, query: &SearchQuery, record: PaperRecord) -> Option<ScoredRecord> {
        let title = record.title.to_lowercase();
        let abstract_text = record.abstract_text.to_lowercase();
        let keywords = record.keywords.to_lowercase();
        let field_name = record.field_name.to_lowercase();
        let field_description = record.field_description.to_lowercase();
        let authors: Vec<(String, String)> = record
            .authors
            .iter()
            .map(|a| (a.first_name.to_lowercase(), a.last_name.to_lowercase()))
            .collect();

        let matches = query.terms().iter().any(|term| {
            let term = term.as_str();
            title.contains(term)
                || abstract_text.contains(term)
                || keywords.contains(term)
                || field_name.contains(term)
                || field_description.contains(term)
                || authors
                    .iter()
                    .any(|(first, last)| first.contains(term) || last.contains(term))
        });
        if !matches {
            return None;
        }

        if let Some(required_field) = query.field_id
            && record.field_id != required_field
        {
            return None;
        }
        if let Some(from) = query.published_from
            && record.published_on < from
        {
            return None;
        }
        if let Some(to) = query.published_to
            && record.published_on > to
        {
            return None;
        }
        let average_rating = record.average_rating();
        if let Some(floor) = query.min_rating
            && average_rating < floor
        {
            return None;
        }

        let phrase = query.phrase();
        let mut score = 0u32;
        if title.contains(phrase) {
            score += TITLE_PHRASE_WEIGHT;
        }
        let title_terms = query
            .terms()
            .iter()
            .filter(|term| title.contains(term.as_str()))
            .count() as u32;
        score += TITLE_TERM_WEIGHT * title_terms;
        if keywords.contains(phrase) {
            score += KEYWORD_PHRASE_WEIGHT;
        }
        if authors
            .iter()
            .any(|(first, last)| first.contains(phrase) || last.contains(phrase))
        {
            score += AUTHOR_PHRASE_WEIGHT;
        }
        if query
            .terms()
            .iter()
            .any(|term| abstract_text.contains(term.as_str()))
        {
            score += ABSTRACT_TERM_WEIGHT;
        }
        if field_name.contains(phrase) {
            score += FIELD_PHRASE_WEIGHT;
        }

        Some(ScoredRecord {
            record,
            relevance_score: score,
            average_rating,
        })
    }
}

/// Ordering chains per sort mode. Floats go through `total_cmp` so NaN or
/// negative zero can never make the ordering disagree between runs; record
/// id ascending is always the final tie-break.
fn compare(mode: SortMode, a: &ScoredRecord, b: &ScoredRecord) -> Ordering {
    match mode {
        SortMode::Relevance => b
            .relevance_score
            .cmp(&a.relevance_score)
            .then_with(|| b.average_rating.total_cmp(&a.average_rating))
            .then_with(|| b.record.download_count.cmp(&a.record.download_count))
            .then_with(|| b.record.published_on.cmp(&a.record.published_on))
            .then_with(|| a.record.id.cmp(&b.record.id)),
        SortMode::Date => b
            .record
            .published_on
            .cmp(&a.record.published_on)
            .then_with(|| b.relevance_score.cmp(&a.relevance_score))
            .then_with(|| a.record.id.cmp(&b.record.id)),
        SortMode::Rating => b
            .average_rating
            .total_cmp(&a.average_rating)
            .then_with(|| b.relevance_score.cmp(&a.relevance_score))
            .then_with(|| b.record.published_on.cmp(&a.record.published_on))
            .then_with(|| a.record.id.cmp(&b.record.id)),
        SortMode::Downloads => b
            .record
            .download_count
            .cmp(&a.record.download_count)
            .then_with(|| b.relevance_score.cmp(&a.relevance_score))
            .then_with(|| b.record.published_on.cmp(&a.record.published_on))
            .then_with(|| a.record.id.cmp(&b.record.id)),
    }
}
