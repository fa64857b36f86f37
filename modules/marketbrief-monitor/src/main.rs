use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ai_client::DeepSeekClient;
use marketbrief_common::{Config, RunConfig};
use marketbrief_monitor::gatherer::TavilySearcher;
use marketbrief_monitor::orchestrator::{Orchestrator, TerminalOutcome};
use marketbrief_monitor::publisher::MarkdownPublisher;

/// Combined site-restricted queries keep one search per source group.
const DEFAULT_QUERIES: &[&str] = &[
    "site:pbc.gov.cn OR site:mof.gov.cn OR site:stats.gov.cn OR site:ndrc.gov.cn 宏观政策",
    "site:csrc.gov.cn OR site:nfra.gov.cn OR site:safe.gov.cn 金融监管",
    "site:gov.cn 国务院 经济",
    "site:cs.com.cn OR site:cnstock.com OR site:stcn.com 资本市场",
    "site:caixin.com OR site:yicai.com OR site:21jingji.com 深度报道",
    "site:cls.cn OR site:jiemian.com OR site:thepaper.cn 财经快讯",
];

#[derive(Parser)]
#[command(
    name = "marketbrief-monitor",
    about = "Fact-checked financial briefings from web search"
)]
struct Args {
    /// TOML run configuration; built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Search query (repeatable); the built-in query set is used when omitted.
    #[arg(long = "query")]
    queries: Vec<String>,

    /// Where briefings are written.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Correction-cycle bound before the run fails.
    #[arg(long)]
    max_cycles: Option<u32>,

    /// Write the raw corpus snapshot next to the briefing.
    #[arg(long)]
    save_corpus: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("marketbrief_monitor=info".parse()?),
        )
        .init();

    let args = Args::parse();

    info!("MarketBrief monitor starting");
    let secrets = Config::from_env();
    secrets.log_redacted();

    let mut run_config = match &args.config {
        Some(path) => RunConfig::from_toml_file(path)?,
        None => RunConfig::default(),
    };
    if let Some(dir) = args.output_dir {
        run_config.output_dir = dir;
    }
    if let Some(max_cycles) = args.max_cycles {
        run_config.max_cycles = max_cycles;
    }
    if args.save_corpus {
        run_config.save_corpus_snapshot = true;
    }

    let queries: Vec<String> = if args.queries.is_empty() {
        DEFAULT_QUERIES.iter().map(|q| q.to_string()).collect()
    } else {
        args.queries
    };

    let searcher = Arc::new(TavilySearcher::new(&secrets.tavily_api_key));
    let completion = Arc::new(DeepSeekClient::new(&secrets.deepseek_api_key));
    let publisher = Arc::new(MarkdownPublisher::new(run_config.output_dir.clone()));
    let output_dir = run_config.output_dir.clone();
    let save_snapshot = run_config.save_corpus_snapshot;

    let orchestrator = Orchestrator::new(searcher, completion, publisher, run_config);
    let report = orchestrator.run(queries).await;

    println!("{}", report.stats);

    if save_snapshot {
        let snapshot_path = output_dir.join(format!(
            "corpus-{}.json",
            report.state.run_id.simple()
        ));
        std::fs::create_dir_all(&output_dir)?;
        std::fs::write(
            &snapshot_path,
            serde_json::to_string_pretty(&report.state.articles)?,
        )?;
        info!(path = %snapshot_path.display(), "Corpus snapshot written");
    }

    match report.outcome {
        TerminalOutcome::Published { path, audit_passes } => {
            info!(
                path = %path.display(),
                audit_passes,
                "Briefing published"
            );
            Ok(())
        }
        TerminalOutcome::Failed { error } => {
            error!(error = %error, "Run failed");
            if let Some(audit) = report.state.latest_audit() {
                for issue in &audit.issues {
                    error!(
                        kind = %issue.kind,
                        entity = issue.entity_ref.as_str(),
                        expected = issue.expected.as_deref().unwrap_or("-"),
                        found = issue.found.as_str(),
                        "Unresolved audit issue"
                    );
                }
            }
            std::process::exit(1);
        }
    }
}
