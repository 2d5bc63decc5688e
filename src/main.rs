//! Otterlens - concurrent pull request analysis
//!
//! A CLI that asks remote analysis producers about a pull request and
//! renders their answers as Markdown or JSON.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (config, diff, output, etc.)
//!   2 - Permission denied
//!   3 - Analysis degraded (timed out or failed; defaults shown)

use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use otterlens::analysis::{AggregationEngine, EngineConfig, EventSink, PipelineEvent};
use otterlens::cache::{CacheStore, FileCacheStore, MemoryCacheStore};
use otterlens::cli::{Args, Mode, OutputFormat};
use otterlens::config::{CacheBackend, Config, DEFAULT_CONFIG_FILE};
use otterlens::models::{
    AnalysisRequest, ConventionRequest, MergedPullRequest, Principal, ProducerResult,
};
use otterlens::permission::AllowListService;
use otterlens::producer::HttpTransport;
use otterlens::report::{self, MarkdownSection};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

const EXIT_PERMISSION_DENIED: i32 = 2;
const EXIT_DEGRADED: i32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    let config = match load_config(&args) {
        Ok(mut config) => {
            config.merge_with_args(&args);
            config
        }
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(config.log_level(args.quiet));

    info!("Otterlens v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .otterlens.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to set the producer endpoint, cache backend and permission grants.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the selected analysis. Returns the process exit code.
async fn run(args: Args, config: Config) -> Result<i32> {
    let repo_id = args.repo_id.context("--repo-id is required")?;
    let user_id = args.user_id.context("--user-id is required")?;
    let source = args.source.clone().context("--source is required")?;
    let principal = Principal::new(user_id);

    let mut request = AnalysisRequest::new(repo_id, source, args.target.clone());
    if let Some(diff) = load_diff(&args)? {
        request = request.with_diff(diff);
    }

    let transport = Arc::new(
        HttpTransport::new(
            config.producers.base_url.clone(),
            Duration::from_secs(config.producers.call_timeout_seconds),
        )?,
    );
    let (events, receiver) = EventSink::channel();
    let engine = AggregationEngine::new(
        transport.clone(),
        build_cache(&config),
        Arc::new(AllowListService::from(&config.permissions)),
        EngineConfig::from(&config),
    )
    .with_events(events);

    let spinner = spawn_spinner(receiver, args.quiet);

    let outcome = run_mode(&args, &engine, &transport, &principal, &request).await;

    engine.flush().await;
    drop(engine);
    let _ = spinner.await;

    let (rendered, exit_code) = match outcome {
        Ok(result) => result,
        Err(e) => match e.downcast_ref::<otterlens::AnalysisError>() {
            Some(denied) if denied.is_permission_denied() => {
                eprintln!("⛔ {}", denied);
                return Ok(EXIT_PERMISSION_DENIED);
            }
            _ => return Err(e),
        },
    };

    if let Some(rendered) = rendered {
        emit_output(&rendered, &config.general.output)?;
    }
    Ok(exit_code)
}

/// Dispatch on `--mode`. Returns the rendered output, if any, and the exit code.
async fn run_mode(
    args: &Args,
    engine: &AggregationEngine,
    transport: &HttpTransport,
    principal: &Principal,
    request: &AnalysisRequest,
) -> Result<(Option<String>, i32)> {
    if args.mode == Mode::All {
        let aggregate = engine.analyze_all(principal, request).await?;
        let exit_code = if aggregate.has_errors {
            warn!("Analysis degraded: showing default values");
            EXIT_DEGRADED
        } else {
            0
        };
        let rendered = match args.format {
            OutputFormat::Json => report::generate_json_report(&aggregate)?,
            OutputFormat::Markdown => report::generate_markdown_report(request, &aggregate),
        };
        return Ok((Some(rendered), exit_code));
    }

    engine.authorize(principal, request.repo_id).await?;

    let rendered = match args.mode {
        Mode::Title => render(args.format, request, &engine.recommend_title(request).await)?,
        Mode::Reviewers => {
            render(args.format, request, &engine.recommend_reviewers(request).await)?
        }
        Mode::Priority => render(args.format, request, &engine.recommend_priority(request).await)?,
        Mode::Summary => render(args.format, request, &engine.summarize(request).await)?,
        Mode::Convention => {
            let convention = ConventionRequest::for_change(request, args.convention_rules());
            render(args.format, request, &engine.check_conventions(&convention).await)?
        }
        Mode::Archive => {
            let pull_request = MergedPullRequest {
                id: args.pr_id.context("--pr-id is required")?,
                repo_id: request.repo_id,
                title: args.title.clone().context("--title is required")?,
                body: args.body.clone().unwrap_or_default(),
                source: request.source.clone(),
                target: request.target.clone(),
                merged_at: Utc::now(),
            };
            transport.archive_merged(&pull_request).await;
            return Ok((None, 0));
        }
        Mode::All => unreachable!("handled above"),
    };

    Ok((Some(rendered), 0))
}

fn render<T: MarkdownSection + Serialize>(
    format: OutputFormat,
    request: &AnalysisRequest,
    result: &ProducerResult<T>,
) -> Result<String> {
    match format {
        OutputFormat::Json => report::generate_json_report(result),
        OutputFormat::Markdown => Ok(report::generate_producer_report(request, result)),
    }
}

fn build_cache(config: &Config) -> Arc<dyn CacheStore> {
    let ttl = Duration::from_secs(config.cache.ttl_seconds);
    match config.cache.backend {
        CacheBackend::Memory => {
            debug!("Using in-memory cache ({} entries)", config.cache.max_entries);
            Arc::new(MemoryCacheStore::new(config.cache.max_entries, ttl))
        }
        CacheBackend::File => {
            info!("Using file cache at {}", config.cache.directory);
            Arc::new(FileCacheStore::new(&config.cache.directory, ttl))
        }
    }
}

/// Read the change from `--diff-file` or compute it from `--repo-path`.
fn load_diff(args: &Args) -> Result<Option<String>> {
    if let Some(ref path) = args.diff_file {
        let diff = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read diff file: {}", path.display()))?;
        return Ok(Some(diff));
    }

    if let Some(ref repo_path) = args.repo_path {
        let source = args.source.as_deref().unwrap_or_default();
        let diff = otterlens::repo::branch_diff(repo_path, &args.target, source)?;
        if diff.is_empty() {
            warn!("{} has no changes relative to {}", source, args.target);
        }
        return Ok(Some(diff.patch));
    }

    Ok(None)
}

/// Show pipeline events on a spinner until the engine is dropped.
fn spawn_spinner(mut receiver: UnboundedReceiver<PipelineEvent>, quiet: bool) -> JoinHandle<()> {
    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message("starting analysis");

    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            debug!("Pipeline event: {:?}", event);
            spinner.set_message(event.to_string());
        }
        spinner.finish_and_clear();
    })
}

fn emit_output(rendered: &str, output: &str) -> Result<()> {
    if output.is_empty() {
        println!("{}", rendered);
        return Ok(());
    }

    report::write_report(rendered, Path::new(output))?;
    println!("✅ Result saved to: {}", output);
    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Runs before logging is set up, so problems go straight to stderr.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => {
            eprintln!("⚠️  Failed to load {}: {:#}", DEFAULT_CONFIG_FILE, e);
            Ok(Config::default())
        }
    }
}
