//! Knowledge retrieval: parallel vector search + web scraping, merged into a
//! ranked, deduplicated, cited result set.
//!
//! The [`KnowledgeRetriever`] consumes two pluggable capabilities — a
//! [`VectorSearch`] index and a [`WebScraper`] — and produces a
//! [`KnowledgeBundle`] for prompt assembly. Backends are interchangeable:
//! remote cloud, local server, or the bundled [`InMemoryVectorSearch`]
//! fallback that keeps the whole core testable without external services.
//!
//! # Retrieval strategy
//!
//! 1. Classify the query into [`QueryFeatures`] (temporal / specific /
//!    technical / comparison).
//! 2. Always run vector search (limit 5, or 10 for technical queries).
//! 3. Additionally scrape up to K configured URLs (K = 3, or 5 for
//!    comparisons) when the query is temporal or a comparison, or when the
//!    best vector hit scores below 0.7.
//! 4. Sources run concurrently, each under its own timeout; a failed or
//!    empty source never fails the call.
//! 5. Merge, fingerprint-dedup, rank, and emit ordered [`Citation`]s.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentmesh::knowledge::{InMemoryVectorSearch, KnowledgeArticle, KnowledgeRetriever};
//! use std::sync::Arc;
//!
//! # async {
//! let index = InMemoryVectorSearch::new();
//! index.insert(KnowledgeArticle::new(
//!     "kb-1",
//!     "Webhook signature verification",
//!     "Verify the X-Signature header by computing an HMAC over the raw body…",
//!     "integrations",
//! )).await;
//!
//! let retriever = KnowledgeRetriever::new(Arc::new(index));
//! let bundle = retriever.retrieve("How do I verify webhook signatures?").await;
//! assert!(!bundle.snippets.is_empty());
//! assert_eq!(bundle.citations[0].index, 1);
//! # };
//! ```

use crate::agentmesh::error::{ErrorKind, MeshError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};

/// Characters of lowercased content hashed for duplicate detection.
const FINGERPRINT_PREFIX_CHARS: usize = 500;

/// Vector-similarity floor below which scraping is also attempted.
const VECTOR_CONFIDENCE_FLOOR: f64 = 0.7;

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

/// One entry in the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeArticle {
    /// Stable article identifier.
    pub id: String,
    /// Title shown in citations and used for title-match ranking.
    pub title: String,
    /// Body text.
    pub content: String,
    /// Category tag (e.g. `"integrations"`, `"billing"`).
    pub category: String,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// When the article was created.
    pub created_at: DateTime<Utc>,
    /// When the article was last updated; drives freshness ranking.
    pub updated_at: DateTime<Utc>,
    /// Original source URL when the article was imported from the web.
    pub source_url: Option<String>,
}

impl KnowledgeArticle {
    /// Create an article stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            category: category.into(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            source_url: None,
        }
    }

    /// Attach tags (builder pattern).
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Attach a source URL (builder pattern).
    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }
}

/// Whether a citation points inside the knowledge base or out to the web.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationKind {
    /// Indexed knowledge-base article.
    Internal,
    /// Scraped web page.
    External,
}

/// A structured pointer to a knowledge source used in an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based ordinal matching the snippet order handed to the agent.
    pub index: usize,
    /// Source title.
    pub title: String,
    /// Source label: the article category for internal citations, the host
    /// for external ones.
    pub source: String,
    /// URL for external citations.
    pub url: Option<String>,
    /// Final ranking score, clamped to `[0, 1]`.
    pub relevance: f64,
    /// Internal vs. external.
    pub kind: CitationKind,
    /// For external citations: when the page was fetched. For internal ones:
    /// when the article was last updated.
    pub timestamp: DateTime<Utc>,
}

/// Feature flags extracted from the query text that steer retrieval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFeatures {
    /// Asks about recent or current state (also true for year tokens).
    pub temporal: bool,
    /// Asks for a concrete procedure (how-to, guide, tutorial).
    pub specific: bool,
    /// Mentions APIs, code, or integration machinery.
    pub technical: bool,
    /// Compares alternatives.
    pub comparison: bool,
}

impl QueryFeatures {
    /// Classify a query by keyword inspection.
    ///
    /// # Example
    ///
    /// ```rust
    /// use agentmesh::knowledge::QueryFeatures;
    ///
    /// let f = QueryFeatures::detect("compare the latest webhook API options");
    /// assert!(f.temporal && f.technical && f.comparison);
    /// assert!(!QueryFeatures::detect("hello").technical);
    /// ```
    pub fn detect(query: &str) -> Self {
        let lower = query.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        let year_token = lower
            .split(|c: char| !c.is_ascii_digit())
            .any(|t| t.len() == 4 && (t.starts_with("19") || t.starts_with("20")));

        Self {
            temporal: has(&["latest", "current", "recent", "new", "updated"]) || year_token,
            specific: has(&["how to", "step by step", "guide", "tutorial", "example"]),
            technical: has(&["api", "webhook", "integration", "code", "implementation"]),
            comparison: has(&["compare", "versus", "vs", "difference", "better"]),
        }
    }
}

// ---------------------------------------------------------------------------
// Capability interfaces
// ---------------------------------------------------------------------------

/// A single vector-search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    /// Backing article id.
    pub id: String,
    /// Article title.
    pub title: String,
    /// Article body.
    pub content: String,
    /// Article category.
    pub category: String,
    /// Article tags.
    pub tags: Vec<String>,
    /// Cosine similarity in `[0, 1]`.
    pub similarity: f64,
    /// Last-updated timestamp of the backing article.
    pub updated_at: DateTime<Utc>,
    /// Source URL of the backing article, if imported.
    pub source_url: Option<String>,
}

/// Vector-index capability. Cosine distance semantics; the embedding
/// dimension is fixed per collection by the backing implementation.
#[async_trait::async_trait]
pub trait VectorSearch: Send + Sync {
    /// Return up to `limit` hits for `query`, optionally restricted to a
    /// category.
    async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&str>,
    ) -> Result<Vec<VectorHit>, MeshError>;
}

/// Options forwarded to the scraper backend.
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    /// Strip navigation/boilerplate and return only the main content.
    pub main_content_only: bool,
    /// Output formats requested from the backend.
    pub formats: Vec<String>,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            main_content_only: true,
            formats: vec![String::from("markdown")],
        }
    }
}

/// A fetched page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedPage {
    /// Page title.
    pub title: String,
    /// Extracted content.
    pub content: String,
    /// Backend-specific metadata.
    pub metadata: HashMap<String, String>,
    /// When the fetch completed.
    pub scraped_at: DateTime<Utc>,
    /// The fetched URL.
    pub url: String,
}

/// Web-scraping capability.
#[async_trait::async_trait]
pub trait WebScraper: Send + Sync {
    /// Fetch and extract one page.
    async fn scrape(&self, url: &str, options: &ScrapeOptions) -> Result<ScrapedPage, MeshError>;
}

/// Remote [`WebScraper`] backed by an HTTP extraction service.
///
/// Sends `GET {base_url}/scrape?url=<encoded>&main_content=<bool>` and
/// expects a JSON body `{"title", "content", "metadata"}`. Connections are
/// reused and in-flight requests bounded through the shared
/// [`ProviderPool`](crate::http_client_pool::ProviderPool); a saturated pool
/// surfaces as `pool_exhausted` rather than queueing without bound.
pub struct HttpScraper {
    base_url: String,
    pool: crate::agentmesh::http_client_pool::ProviderPool,
}

impl HttpScraper {
    /// Point at an extraction service with the given request-concurrency
    /// ceiling.
    pub fn new(base_url: impl Into<String>, concurrency: usize) -> Self {
        let base_url = base_url.into();
        let pool = crate::agentmesh::http_client_pool::ProviderPool::new(&base_url, concurrency);
        Self { base_url, pool }
    }

    fn endpoint_for(&self, url: &str, options: &ScrapeOptions) -> String {
        format!(
            "{}/scrape?url={}&main_content={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(url),
            options.main_content_only
        )
    }
}

#[async_trait::async_trait]
impl WebScraper for HttpScraper {
    async fn scrape(&self, url: &str, options: &ScrapeOptions) -> Result<ScrapedPage, MeshError> {
        #[derive(Deserialize)]
        struct ExtractionBody {
            title: String,
            content: String,
            #[serde(default)]
            metadata: HashMap<String, String>,
        }

        let lease = self.pool.acquire().await?;
        let endpoint = self.endpoint_for(url, options);
        let response = lease.client().get(&endpoint).send().await.map_err(|e| {
            if e.is_timeout() {
                MeshError::timeout(format!("scrape of {} timed out", url))
            } else {
                MeshError::provider(format!("scrape request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(MeshError::new(
                ErrorKind::RateLimited,
                format!("extraction service throttled scrape of {}", url),
            ));
        }
        if !status.is_success() {
            return Err(MeshError::provider(format!(
                "extraction service returned {} for {}",
                status, url
            )));
        }

        let body: ExtractionBody = response
            .json()
            .await
            .map_err(|e| MeshError::provider(format!("malformed extraction response: {}", e)))?;

        Ok(ScrapedPage {
            title: body.title,
            content: body.content,
            metadata: body.metadata,
            scraped_at: Utc::now(),
            url: url.to_string(),
        })
    }
}

/// A URL the retriever is allowed to scrape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlUrl {
    /// Stable identifier.
    pub id: String,
    /// The URL itself.
    pub url: String,
    /// Inactive URLs are skipped.
    pub is_active: bool,
    /// When the URL was registered.
    pub created_at: DateTime<Utc>,
    /// Last successful fetch, if any.
    pub last_crawled: Option<DateTime<Utc>>,
}

impl CrawlUrl {
    /// Register an active crawl URL.
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            is_active: true,
            created_at: Utc::now(),
            last_crawled: None,
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory fallback index
// ---------------------------------------------------------------------------

/// In-memory [`VectorSearch`] fallback.
///
/// Scores by word overlap between the query and `title + content + tags`,
/// which approximates cosine similarity over bag-of-words embeddings well
/// enough for tests and offline operation. Not meant to replace a real index
/// at scale.
pub struct InMemoryVectorSearch {
    articles: RwLock<Vec<KnowledgeArticle>>,
}

impl InMemoryVectorSearch {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            articles: RwLock::new(Vec::new()),
        }
    }

    /// Create an index pre-populated with articles.
    pub fn with_articles(articles: Vec<KnowledgeArticle>) -> Self {
        Self {
            articles: RwLock::new(articles),
        }
    }

    /// Add one article.
    pub async fn insert(&self, article: KnowledgeArticle) {
        self.articles.write().await.push(article);
    }

    /// Number of indexed articles.
    pub async fn len(&self) -> usize {
        self.articles.read().await.len()
    }

    /// Whether the index holds no articles.
    pub async fn is_empty(&self) -> bool {
        self.articles.read().await.is_empty()
    }
}

impl Default for InMemoryVectorSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl VectorSearch for InMemoryVectorSearch {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&str>,
    ) -> Result<Vec<VectorHit>, MeshError> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let articles = self.articles.read().await;
        let mut hits: Vec<VectorHit> = articles
            .iter()
            .filter(|a| filter.map_or(true, |f| a.category.eq_ignore_ascii_case(f)))
            .filter_map(|article| {
                let haystack = format!(
                    "{} {} {}",
                    article.title,
                    article.content,
                    article.tags.join(" ")
                );
                let doc_tokens = tokenize(&haystack);
                let overlap = query_tokens.intersection(&doc_tokens).count();
                if overlap == 0 {
                    return None;
                }
                let similarity = overlap as f64 / query_tokens.len() as f64;
                Some(VectorHit {
                    id: article.id.clone(),
                    title: article.title.clone(),
                    content: article.content.clone(),
                    category: article.category.clone(),
                    tags: article.tags.clone(),
                    similarity: similarity.min(1.0),
                    updated_at: article.updated_at,
                    source_url: article.source_url.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(String::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Ranked output
// ---------------------------------------------------------------------------

/// Where a merged snippet came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnippetSource {
    /// Vector index hit.
    Indexed,
    /// Scraped web page.
    Scraped,
}

/// One merged, ranked knowledge snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedSnippet {
    /// Source title.
    pub title: String,
    /// Source content (full body; prompt assembly truncates as needed).
    pub content: String,
    /// Category for indexed snippets.
    pub category: Option<String>,
    /// URL for scraped snippets (or imported articles).
    pub url: Option<String>,
    /// Which capability produced it.
    pub source: SnippetSource,
    /// Raw relevance from the producing capability.
    pub base_relevance: f64,
    /// Final ranking score.
    pub score: f64,
    /// Freshness reference: update time for articles, fetch time for pages.
    pub updated_at: DateTime<Utc>,
}

/// The retriever's full answer for one query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBundle {
    /// Ranked, deduplicated snippets, best first.
    pub snippets: Vec<RankedSnippet>,
    /// Citations aligned with `snippets` (same order, 1-based indices).
    pub citations: Vec<Citation>,
    /// Non-fatal problems encountered (source failures, timeouts).
    pub warnings: Vec<String>,
}

impl KnowledgeBundle {
    /// Whether every source failed and the bundle carries no knowledge.
    pub fn is_unavailable(&self) -> bool {
        self.snippets.is_empty() && !self.warnings.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Retriever
// ---------------------------------------------------------------------------

/// Coordinates vector search and scraping for one query.
///
/// Owns the scrape-concurrency semaphore (5 in-flight fetches per instance)
/// and the per-capability timeouts. See the module docs for the strategy.
pub struct KnowledgeRetriever {
    vector: Arc<dyn VectorSearch>,
    scraper: Option<Arc<dyn WebScraper>>,
    crawl_urls: Vec<CrawlUrl>,
    scrape_permits: Arc<Semaphore>,
    vector_timeout: Duration,
    scrape_timeout: Duration,
}

impl KnowledgeRetriever {
    /// Create a retriever over a vector index, with no scraper attached.
    ///
    /// Defaults: 5 s vector timeout, 15 s scrape timeout, 5 concurrent
    /// scrapes.
    pub fn new(vector: Arc<dyn VectorSearch>) -> Self {
        Self {
            vector,
            scraper: None,
            crawl_urls: Vec::new(),
            scrape_permits: Arc::new(Semaphore::new(5)),
            vector_timeout: Duration::from_secs(5),
            scrape_timeout: Duration::from_secs(15),
        }
    }

    /// Attach a scraper and the URL set it may fetch (builder pattern).
    pub fn with_scraper(mut self, scraper: Arc<dyn WebScraper>, crawl_urls: Vec<CrawlUrl>) -> Self {
        self.scraper = Some(scraper);
        self.crawl_urls = crawl_urls;
        self
    }

    /// Override the per-capability timeouts (builder pattern).
    pub fn with_timeouts(mut self, vector_timeout: Duration, scrape_timeout: Duration) -> Self {
        self.vector_timeout = vector_timeout;
        self.scrape_timeout = scrape_timeout;
        self
    }

    /// Override the scrape-concurrency ceiling (builder pattern).
    pub fn with_scrape_concurrency(mut self, permits: usize) -> Self {
        self.scrape_permits = Arc::new(Semaphore::new(permits));
        self
    }

    /// Run the full retrieval strategy for `query`.
    ///
    /// Never fails: source errors become warnings and an empty bundle at
    /// worst. The caller decides whether to proceed without citations.
    pub async fn retrieve(&self, query: &str) -> KnowledgeBundle {
        let features = QueryFeatures::detect(query);
        let vector_limit = if features.technical { 10 } else { 5 };
        let scrape_count = if features.comparison { 5 } else { 3 };

        let mut warnings = Vec::new();

        // Scrapes that don't depend on the vector outcome start immediately,
        // concurrent with the search.
        let eager_scrape = features.temporal || features.comparison;
        let mut scrape_task = if eager_scrape {
            Some(tokio::spawn(self.spawn_scrapes(scrape_count)))
        } else {
            None
        };

        let vector_hits = match tokio::time::timeout(
            self.vector_timeout,
            self.vector.search(query, vector_limit, None),
        )
        .await
        {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                log::warn!("vector search failed: {}", e);
                warnings.push(format!("vector search failed: {}", e.kind));
                Vec::new()
            }
            Err(_) => {
                log::warn!("vector search timed out after {:?}", self.vector_timeout);
                warnings.push(String::from("vector search failed: timeout"));
                Vec::new()
            }
        };

        let top_similarity = vector_hits.first().map(|h| h.similarity).unwrap_or(0.0);
        if scrape_task.is_none() && top_similarity < VECTOR_CONFIDENCE_FLOOR {
            scrape_task = Some(tokio::spawn(self.spawn_scrapes(scrape_count)));
        }

        let mut pages = Vec::new();
        if let Some(task) = scrape_task {
            match task.await {
                Ok((fetched, scrape_warnings)) => {
                    pages = fetched;
                    warnings.extend(scrape_warnings);
                }
                Err(e) => warnings.push(format!("scrape task failed: {}", e)),
            }
        }

        if vector_hits.is_empty() && pages.is_empty() {
            if warnings.is_empty() {
                return KnowledgeBundle::default();
            }
            log::warn!("all knowledge sources failed for query");
            warnings.push(format!(
                "{}: all knowledge sources failed",
                ErrorKind::KnowledgeUnavailable
            ));
            return KnowledgeBundle {
                warnings,
                ..KnowledgeBundle::default()
            };
        }

        let snippets = merge_and_rank(query, vector_hits, pages);
        let citations = build_citations(&snippets);

        KnowledgeBundle {
            snippets,
            citations,
            warnings,
        }
    }

    /// Passthrough search for the `searchKnowledge` surface. The limit is
    /// clamped to 50.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&str>,
    ) -> Result<Vec<VectorHit>, MeshError> {
        if query.trim().is_empty() {
            return Err(MeshError::invalid_input("search query must not be empty"));
        }
        let limit = limit.clamp(1, 50);
        tokio::time::timeout(self.vector_timeout, self.vector.search(query, limit, filter))
            .await
            .map_err(|_| MeshError::timeout("knowledge search timed out"))?
    }

    /// Fetch the active crawl URLs concurrently, bounded by the scrape
    /// semaphore, each under its own timeout. Failures are collected as
    /// warnings.
    fn spawn_scrapes(
        &self,
        count: usize,
    ) -> impl std::future::Future<Output = (Vec<ScrapedPage>, Vec<String>)> {
        let scraper = self.scraper.clone();
        let urls: Vec<String> = self
            .crawl_urls
            .iter()
            .filter(|u| u.is_active)
            .take(count)
            .map(|u| u.url.clone())
            .collect();
        let permits = Arc::clone(&self.scrape_permits);
        let timeout = self.scrape_timeout;

        async move {
            let scraper = match scraper {
                Some(scraper) => scraper,
                None => return (Vec::new(), Vec::new()),
            };

            let fetches = urls.into_iter().map(|url| {
                let scraper = Arc::clone(&scraper);
                let permits = Arc::clone(&permits);
                async move {
                    let _permit = match permits.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => return Err((url, String::from("scrape pool closed"))),
                    };
                    match tokio::time::timeout(
                        timeout,
                        scraper.scrape(&url, &ScrapeOptions::default()),
                    )
                    .await
                    {
                        Ok(Ok(page)) => Ok(page),
                        Ok(Err(e)) => Err((url, e.kind.to_string())),
                        Err(_) => Err((url, ErrorKind::Timeout.to_string())),
                    }
                }
            });

            let mut pages = Vec::new();
            let mut warnings = Vec::new();
            for outcome in futures_util::future::join_all(fetches).await {
                match outcome {
                    Ok(page) => pages.push(page),
                    Err((url, kind)) => {
                        log::warn!("scrape of {} failed: {}", url, kind);
                        warnings.push(format!("scrape of {} failed: {}", url, kind));
                    }
                }
            }
            (pages, warnings)
        }
    }
}

// ---------------------------------------------------------------------------
// Merge, dedup, rank, cite
// ---------------------------------------------------------------------------

/// Content fingerprint: SHA-256 over the first 500 lowercased characters.
/// Two results with the same prefix collapse to the first occurrence.
fn fingerprint(content: &str) -> String {
    let lowered = content.to_lowercase();
    let prefix: String = lowered.chars().take(FINGERPRINT_PREFIX_CHARS).collect();
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn merge_and_rank(
    query: &str,
    vector_hits: Vec<VectorHit>,
    pages: Vec<ScrapedPage>,
) -> Vec<RankedSnippet> {
    let query_tokens: Vec<String> = tokenize(query).into_iter().collect();
    let now = Utc::now();
    let mut seen = HashSet::new();
    let mut snippets = Vec::new();

    for hit in vector_hits {
        if !seen.insert(fingerprint(&hit.content)) {
            continue;
        }
        let score = rank_score(
            hit.similarity,
            hit.updated_at,
            SnippetSource::Indexed,
            &hit.title,
            &query_tokens,
            now,
        );
        snippets.push(RankedSnippet {
            title: hit.title,
            content: hit.content,
            category: Some(hit.category),
            url: hit.source_url,
            source: SnippetSource::Indexed,
            base_relevance: hit.similarity,
            score,
            updated_at: hit.updated_at,
        });
    }

    for page in pages {
        if !seen.insert(fingerprint(&page.content)) {
            continue;
        }
        // Scraped pages carry no similarity; estimate relevance from query
        // token coverage of the content.
        let content_tokens = tokenize(&page.content);
        let covered = query_tokens
            .iter()
            .filter(|t| content_tokens.contains(*t))
            .count();
        let base = if query_tokens.is_empty() {
            0.5
        } else {
            (covered as f64 / query_tokens.len() as f64).min(1.0)
        };
        let score = rank_score(
            base,
            page.scraped_at,
            SnippetSource::Scraped,
            &page.title,
            &query_tokens,
            now,
        );
        snippets.push(RankedSnippet {
            title: page.title,
            content: page.content,
            category: None,
            url: Some(page.url),
            source: SnippetSource::Scraped,
            base_relevance: base,
            score,
            updated_at: page.scraped_at,
        });
    }

    snippets.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    snippets
}

/// `0.5·base + 0.2·freshness + sourceBonus + 0.15·titleMatch`, where
/// freshness decays linearly over a year and the source bonus favours
/// scraped (0.15) over indexed (0.10) material.
fn rank_score(
    base_relevance: f64,
    updated_at: DateTime<Utc>,
    source: SnippetSource,
    title: &str,
    query_tokens: &[String],
    now: DateTime<Utc>,
) -> f64 {
    let age_days = (now - updated_at).num_days().max(0) as f64;
    let freshness = (1.0 - age_days / 365.0).max(0.0);
    let source_bonus = match source {
        SnippetSource::Scraped => 0.15,
        SnippetSource::Indexed => 0.10,
    };
    let title_lower = title.to_lowercase();
    let title_match = if query_tokens.iter().any(|t| title_lower.contains(t.as_str())) {
        1.0
    } else {
        0.0
    };
    0.5 * base_relevance + 0.2 * freshness + source_bonus + 0.15 * title_match
}

fn build_citations(snippets: &[RankedSnippet]) -> Vec<Citation> {
    snippets
        .iter()
        .enumerate()
        .map(|(i, snippet)| {
            let (kind, source) = match snippet.source {
                SnippetSource::Indexed => (
                    CitationKind::Internal,
                    snippet
                        .category
                        .clone()
                        .unwrap_or_else(|| String::from("knowledge_base")),
                ),
                SnippetSource::Scraped => (
                    CitationKind::External,
                    snippet
                        .url
                        .as_deref()
                        .and_then(host_of)
                        .unwrap_or_else(|| String::from("web")),
                ),
            };
            Citation {
                index: i + 1,
                title: snippet.title.clone(),
                source,
                url: snippet.url.clone(),
                relevance: snippet.score.clamp(0.0, 1.0),
                kind,
                timestamp: snippet.updated_at,
            }
        })
        .collect()
}

/// Pull the host out of a URL without a full parser.
fn host_of(url: &str) -> Option<String> {
    let rest = url.split("://").nth(1)?;
    let host = rest.split('/').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}
