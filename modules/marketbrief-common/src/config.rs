use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::Tier;

/// Secrets loaded from environment variables.
/// Panics with a clear message if required vars are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub deepseek_api_key: String,
    pub tavily_api_key: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            deepseek_api_key: required_env("DEEPSEEK_API_KEY"),
            tavily_api_key: required_env("TAVILY_API_KEY"),
        }
    }

    /// Log which secrets are present without printing their values.
    pub fn log_redacted(&self) {
        tracing::info!(
            deepseek = !self.deepseek_api_key.is_empty(),
            tavily = !self.tavily_api_key.is_empty(),
            "Loaded API credentials"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

// --- Source whitelist ---

/// Tiered domain allowlist. An article's domain must match a tier-1 or
/// tier-2 entry to feed the Analyst; everything else is kept as unranked.
#[derive(Debug, Clone, Deserialize)]
pub struct Whitelist {
    #[serde(default)]
    pub tier1_domains: Vec<String>,
    #[serde(default)]
    pub tier2_domains: Vec<String>,
}

impl Whitelist {
    pub fn tier_for(&self, domain: &str) -> Tier {
        if self.tier1_domains.iter().any(|d| domain_matches(domain, d)) {
            Tier::Tier1
        } else if self.tier2_domains.iter().any(|d| domain_matches(domain, d)) {
            Tier::Tier2
        } else {
            Tier::Unranked
        }
    }
}

/// Suffix match so subdomains inherit their parent's tier
/// (news.pbc.gov.cn matches pbc.gov.cn, but notpbc.gov.cn does not).
fn domain_matches(domain: &str, allowed: &str) -> bool {
    domain == allowed || domain.ends_with(&format!(".{allowed}"))
}

impl Default for Whitelist {
    fn default() -> Self {
        Self {
            tier1_domains: [
                "pbc.gov.cn",
                "mof.gov.cn",
                "gov.cn",
                "ndrc.gov.cn",
                "stats.gov.cn",
                "csrc.gov.cn",
                "nfra.gov.cn",
                "safe.gov.cn",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            tier2_domains: [
                "caixin.com",
                "cls.cn",
                "yicai.com",
                "21jingji.com",
                "sina.com.cn",
                "news.cn",
                "stcn.com",
                "cs.com.cn",
                "cnstock.com",
                "financialnews.com.cn",
                "ce.cn",
                "jiemian.com",
                "thepaper.cn",
                "eeo.com.cn",
                "nbd.com.cn",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

// --- Entity alias table ---

/// A canonical entity with its known surface forms. Mention resolution in
/// the aligner matches aliases longest-first.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityEntry {
    pub id: String,
    pub canonical_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl EntityEntry {
    fn new(id: &str, canonical_name: &str, aliases: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            canonical_name: canonical_name.to_string(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// All surface forms, canonical name included.
    pub fn surface_forms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical_name.as_str()).chain(self.aliases.iter().map(|s| s.as_str()))
    }
}

fn default_entities() -> Vec<EntityEntry> {
    vec![
        EntityEntry::new("pboc", "中国人民银行", &["央行", "人民银行", "PBOC"]),
        EntityEntry::new("mof", "财政部", &["中国财政部"]),
        EntityEntry::new("csrc", "证监会", &["中国证监会", "CSRC"]),
        EntityEntry::new("state-council", "国务院", &[]),
        EntityEntry::new("fed", "美联储", &["联储", "Federal Reserve"]),
        EntityEntry::new("rrr", "存款准备金率", &["准备金率"]),
        EntityEntry::new("lpr", "贷款市场报价利率", &["LPR"]),
    ]
}

// --- Run configuration ---

/// Everything a run needs beyond secrets: whitelist, entity aliases, the
/// correction-cycle bound, numeral tolerance, and collaborator limits.
/// Loaded once per run and immutable while it executes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub whitelist: Whitelist,
    pub entities: Vec<EntityEntry>,
    /// Maximum correction cycles before the run fails instead of
    /// publishing unverified content.
    pub max_cycles: u32,
    /// Relative tolerance applied only to claims marked approximate.
    pub numeral_tolerance: f64,
    pub max_results_per_query: usize,
    /// Bounded worker pool for per-query retrieval.
    pub search_concurrency: usize,
    /// How many top events the briefing covers.
    pub report_max_events: usize,
    pub completion_timeout_secs: u64,
    pub output_dir: PathBuf,
    /// Write the raw corpus next to the briefing for traceability.
    pub save_corpus_snapshot: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            whitelist: Whitelist::default(),
            entities: default_entities(),
            max_cycles: 2,
            numeral_tolerance: 0.0,
            max_results_per_query: 5,
            search_concurrency: 4,
            report_max_events: 5,
            completion_timeout_secs: 120,
            output_dir: PathBuf::from("daily_reports"),
            save_corpus_snapshot: false,
        }
    }
}

impl RunConfig {
    /// Load from a TOML file. Absent keys fall back to the defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: RunConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }
}
