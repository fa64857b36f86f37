//! Retrieval, deduplication, and whitelist filtering of the article corpus.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use marketbrief_common::{Article, FetchFailure, RunConfig};

// --- WebSearcher trait ---

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub content: String,
}

#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

// --- Tavily adapter ---

pub struct TavilySearcher {
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct TavilySearchRequest {
    api_key: String,
    query: String,
    max_results: usize,
    include_raw_content: bool,
    search_depth: String,
}

#[derive(Debug, Deserialize)]
struct TavilySearchResponse {
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    title: String,
    content: String,
    raw_content: Option<String>,
}

impl TavilySearcher {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }
}

#[async_trait]
impl WebSearcher for TavilySearcher {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        info!(query, max_results, "Tavily search");

        let request = TavilySearchRequest {
            api_key: self.api_key.clone(),
            query: query.to_string(),
            max_results,
            include_raw_content: true,
            search_depth: "advanced".to_string(),
        };

        let resp: TavilySearchResponse = self
            .client
            .post("https://api.tavily.com/search")
            .json(&request)
            .send()
            .await
            .context("Tavily API request failed")?
            .json()
            .await
            .context("Failed to parse Tavily response")?;

        let hits: Vec<SearchHit> = resp
            .results
            .into_iter()
            .map(|r| SearchHit {
                url: r.url,
                title: r.title,
                content: r.raw_content.unwrap_or(r.content),
            })
            .collect();

        info!(query, count = hits.len(), "Tavily search complete");
        Ok(hits)
    }
}

// --- Gatherer ---

#[derive(Debug, Default)]
pub struct GatherOutcome {
    /// Deduplicated corpus, whitelisted and unranked alike. Unranked
    /// articles stay for the audit trail only.
    pub articles: Vec<Article>,
    pub failures: Vec<FetchFailure>,
}

pub struct Gatherer {
    searcher: Arc<dyn WebSearcher>,
}

impl Gatherer {
    pub fn new(searcher: Arc<dyn WebSearcher>) -> Self {
        Self { searcher }
    }

    /// Retrieve all queries through a bounded worker pool. A failing query
    /// is recorded and skipped; the rest of the corpus still proceeds.
    /// Results are merged in query order, then fetch order, so corpus
    /// composition does not depend on completion timing.
    pub async fn gather(&self, queries: &[String], config: &RunConfig) -> GatherOutcome {
        let per_query = config.max_results_per_query;
        let results: Vec<(usize, Result<Vec<SearchHit>>)> =
            stream::iter(queries.iter().enumerate())
                .map(|(idx, query)| {
                    let searcher = Arc::clone(&self.searcher);
                    async move { (idx, searcher.search(query, per_query).await) }
                })
                .buffered(config.search_concurrency.max(1))
                .collect()
                .await;

        let mut raw = Vec::new();
        let mut failures = Vec::new();
        for (idx, result) in results {
            match result {
                Ok(hits) => {
                    for hit in hits {
                        let domain = extract_domain(&hit.url);
                        let tier = config.whitelist.tier_for(&domain);
                        raw.push(Article {
                            id: Uuid::new_v4(),
                            url: hit.url,
                            title: hit.title,
                            body: hit.content,
                            source_domain: domain,
                            tier,
                            fetched_at: Utc::now(),
                        });
                    }
                }
                Err(e) => {
                    warn!(query = queries[idx].as_str(), error = %e, "Search failed");
                    failures.push(FetchFailure {
                        query: queries[idx].clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let raw_count = raw.len();
        let articles = dedupe(raw);
        let eligible = articles.iter().filter(|a| a.tier.eligible()).count();
        info!(
            raw = raw_count,
            deduped = articles.len(),
            eligible,
            failed_queries = failures.len(),
            "Gathering complete"
        );
        GatherOutcome { articles, failures }
    }
}

// --- Dedup ---

/// Collapse duplicate groups to one representative article each. Key is
/// the normalized URL, with a content fingerprint catching syndication
/// copies under different URLs. The highest-tier source survives; ties go
/// to the earliest fetch.
fn dedupe(articles: Vec<Article>) -> Vec<Article> {
    let mut survivors: Vec<Article> = Vec::new();
    let mut by_url: HashMap<String, usize> = HashMap::new();
    let mut by_content: HashMap<String, usize> = HashMap::new();

    for article in articles {
        let url_key = normalize_url(&article.url);
        let content_key = content_fingerprint(&article.title, &article.body);

        let existing = by_url
            .get(&url_key)
            .or_else(|| by_content.get(&content_key))
            .copied();

        match existing {
            Some(idx) => {
                if prefer(&article, &survivors[idx]) {
                    survivors[idx] = article;
                }
            }
            None => {
                survivors.push(article);
                let idx = survivors.len() - 1;
                by_url.insert(url_key, idx);
                by_content.insert(content_key, idx);
            }
        }
    }
    survivors
}

fn prefer(candidate: &Article, incumbent: &Article) -> bool {
    candidate.tier.rank() < incumbent.tier.rank()
        || (candidate.tier.rank() == incumbent.tier.rank()
            && candidate.fetched_at < incumbent.fetched_at)
}

/// Normalize a URL for dedup: case-folded host without "www.", no scheme,
/// no fragment, no tracking parameters, no trailing slash.
pub fn normalize_url(raw: &str) -> String {
    let Ok(parsed) = url::Url::parse(raw) else {
        return raw.trim().to_lowercase();
    };
    let host = parsed
        .host_str()
        .unwrap_or("")
        .trim_start_matches("www.")
        .to_lowercase();
    let path = parsed.path().trim_end_matches('/');
    let query: Vec<String> = parsed
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && k != "fbclid" && k != "gclid")
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    if query.is_empty() {
        format!("{host}{path}")
    } else {
        format!("{host}{path}?{}", query.join("&"))
    }
}

/// SHA-256 over case-folded, whitespace-collapsed title+body.
fn content_fingerprint(title: &str, body: &str) -> String {
    let normalized: String = format!("{title} {body}")
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Registrable domain of a URL, without the "www." prefix.
pub fn extract_domain(raw: &str) -> String {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .map(|h| h.trim_start_matches("www.").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{article, StaticSearcher};
    use marketbrief_common::Tier;

    #[test]
    fn normalize_url_strips_noise() {
        assert_eq!(
            normalize_url("https://www.Caixin.com/news/2026/?utm_source=rss&utm_medium=feed"),
            "caixin.com/news/2026"
        );
        assert_eq!(
            normalize_url("http://caixin.com/news/2026"),
            "caixin.com/news/2026"
        );
    }

    #[test]
    fn identical_bodies_collapse_to_highest_tier() {
        let tier2 = article("caixin.com", "降准公告", "央行宣布降准0.5个百分点", Tier::Tier2);
        let tier1 = article("pbc.gov.cn", "降准公告", "央行宣布降准0.5个百分点", Tier::Tier1);
        let deduped = dedupe(vec![tier2, tier1]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].tier, Tier::Tier1);
        assert_eq!(deduped[0].source_domain, "pbc.gov.cn");
    }

    #[test]
    fn same_url_with_tracking_params_collapses() {
        let a = article("caixin.com", "t", "original body", Tier::Tier2);
        let mut b = article("caixin.com", "t2", "updated body", Tier::Tier2);
        b.url = format!("{}?utm_source=weibo", a.url);
        let deduped = dedupe(vec![a.clone(), b]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].body, "original body");
    }

    #[test]
    fn earlier_fetch_wins_a_tier_tie() {
        let mut first = article("caixin.com", "t", "same body", Tier::Tier2);
        first.url = "https://caixin.com/a".to_string();
        let mut second = article("yicai.com", "t", "same body", Tier::Tier2);
        second.url = "https://yicai.com/b".to_string();
        second.fetched_at = first.fetched_at + chrono::Duration::seconds(10);
        let deduped = dedupe(vec![first.clone(), second]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].source_domain, "caixin.com");
    }

    #[tokio::test]
    async fn failed_query_does_not_abort_the_run() {
        let searcher = StaticSearcher::new()
            .with_hits(
                "宏观政策",
                vec![SearchHit {
                    url: "https://pbc.gov.cn/announce/1".to_string(),
                    title: "公告".to_string(),
                    content: "央行宣布降准0.5个百分点".to_string(),
                }],
            )
            .with_failure("金融监管");
        let gatherer = Gatherer::new(Arc::new(searcher));
        let config = RunConfig::default();

        let outcome = gatherer
            .gather(
                &["宏观政策".to_string(), "金融监管".to_string()],
                &config,
            )
            .await;

        assert_eq!(outcome.articles.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].query, "金融监管");
    }

    #[tokio::test]
    async fn non_whitelisted_domains_are_kept_as_unranked() {
        let searcher = StaticSearcher::new().with_hits(
            "财经",
            vec![
                SearchHit {
                    url: "https://pbc.gov.cn/a".to_string(),
                    title: "a".to_string(),
                    content: "tier one".to_string(),
                },
                SearchHit {
                    url: "https://random-blog.example.com/b".to_string(),
                    title: "b".to_string(),
                    content: "not whitelisted".to_string(),
                },
            ],
        );
        let gatherer = Gatherer::new(Arc::new(searcher));
        let outcome = gatherer
            .gather(&["财经".to_string()], &RunConfig::default())
            .await;

        assert_eq!(outcome.articles.len(), 2);
        let unranked: Vec<_> = outcome
            .articles
            .iter()
            .filter(|a| a.tier == Tier::Unranked)
            .collect();
        assert_eq!(unranked.len(), 1);
        assert_eq!(unranked[0].source_domain, "random-blog.example.com");
    }
}
