use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketBriefError {
    /// Per-query search failure. Non-fatal: other queries still proceed.
    #[error("search failed for query '{query}': {message}")]
    Fetch { query: String, message: String },

    /// A numeral expression carried magnitude or unit markers but no
    /// recognizable numeral token. Localized to one claim.
    #[error("no recognized numeral token in '{0}'")]
    NumeralParse(String),

    /// No whitelisted article survived gathering. Fatal for the run.
    #[error("empty corpus: no whitelisted articles survived gathering")]
    EmptyCorpus,

    /// The draft still failed audit after the configured number of
    /// correction cycles. Fatal; the run report retains the full history.
    #[error("correction cycles exhausted after {cycles} attempts")]
    CycleExhausted { cycles: u32 },

    #[error("completion error: {0}")]
    Completion(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("run aborted")]
    Aborted,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
