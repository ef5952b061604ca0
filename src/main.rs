//! Persona Agent - Entry Point
//!
//! Modes:
//! - Default: run all loops until Ctrl-C
//! - Style and approval queue management commands (see --help)

use anyhow::{bail, Result};
use persona_agent::scheduler::{build_loops, spawn_all};
use persona_agent::style::{
    activate_version, CollectorOptions, StyleAnalyzer, StyleCollector, StylePipeline, StyleRun, StyleTarget,
};
use persona_agent::{AppContext, Config, PendingStatus};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

fn print_help() {
    println!("Persona Agent v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: persona-agent [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --list-styles             List style guide versions");
    println!("  --activate-style <id>     Make a style guide version the active one");
    println!("  --collect-style <handle>  Build a style guide from @handle (or 'self')");
    println!("  --list-pending            List posts waiting for approval");
    println!("  --approve <id>            Approve a staged post");
    println!("  --reject <id>             Reject a staged post");
    println!("  --help, -h                Show this help");
    println!();
    println!("Default: run ingestion, timeline, learning and self-style loops");
    println!();
    println!("Environment variables:");
    println!("  PERSONA_DB_PATH      SQLite database path");
    println!("  PERSONA_FILE         Persona definition (TOML)");
    println!("  REDIS_URL            Redis for cross-process locks");
    println!("  X_BEARER_TOKEN       X API bearer token");
    println!("  X_USER_ID / X_HANDLE Account the persona posts as");
    println!("  ANTHROPIC_API_KEY    Claude API key");
    println!("  SAFE_MODE            Never post (default: false)");
    println!("  REQUIRE_APPROVAL     Stage posts for approval (default: true)");
    println!("  LOG_FORMAT           pretty | json");
}

/// Value following `flag`, if the flag is present
fn arg_value(args: &[String], flag: &str) -> Result<Option<String>> {
    match args.iter().position(|a| a == flag) {
        None => Ok(None),
        Some(i) => match args.get(i + 1) {
            Some(v) if !v.starts_with("--") => Ok(Some(v.clone())),
            _ => bail!("{} requires a value", flag),
        },
    }
}

fn init_logging(json: bool) -> Result<()> {
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let config = Config::from_env()?;
    init_logging(config.json_logs)?;

    if args.iter().any(|a| a == "--list-styles") {
        let ctx = AppContext::init(config)?;
        return list_styles(&ctx);
    }
    if let Some(id) = arg_value(&args, "--activate-style")? {
        let ctx = AppContext::init(config)?;
        let version = activate_version(ctx.store.clone(), &id, ctx.clock.now()).await?;
        println!("Active style guide: {} ({})", version.version_id, version.markdown_path.display());
        return Ok(());
    }
    if let Some(handle) = arg_value(&args, "--collect-style")? {
        let ctx = AppContext::init(config)?;
        return collect_style(&ctx, &handle).await;
    }
    if args.iter().any(|a| a == "--list-pending") {
        let ctx = AppContext::init(config)?;
        for post in ctx.store.list_pending(PendingStatus::Pending)? {
            let reply = post.in_reply_to.map(|id| format!(" (reply to {})", id)).unwrap_or_default();
            println!("{}  {}{}\n    {}", post.id, post.created_at.to_rfc3339(), reply, post.content);
        }
        return Ok(());
    }
    for (flag, approve) in [("--approve", true), ("--reject", false)] {
        if let Some(id) = arg_value(&args, flag)? {
            let ctx = AppContext::init(config.clone())?;
            if !ctx.store.decide_pending(&id, approve, ctx.clock.now())? {
                bail!("No pending post with id {}", id);
            }
            println!("{} {}", if approve { "Approved" } else { "Rejected" }, id);
            return Ok(());
        }
    }

    run_agent(config).await
}

async fn run_agent(config: Config) -> Result<()> {
    info!("Persona Agent v{}", env!("CARGO_PKG_VERSION"));
    if config.posting.safe_mode {
        warn!("SAFE_MODE on: nothing will be posted");
    }

    let ctx = AppContext::init(config)?;
    let loops = build_loops(&ctx);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handles = spawn_all(&loops, shutdown_rx);
    info!("{} loops running, Ctrl-C to stop", handles.len());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown_tx.send(true).ok();

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Loop task ended abnormally: {}", e);
        }
    }

    info!("Persona Agent stopped");
    Ok(())
}

fn list_styles(ctx: &AppContext) -> Result<()> {
    let versions = ctx.store.list_style_versions()?;
    if versions.is_empty() {
        println!("No style guides yet");
    }
    for v in versions {
        println!(
            "{} {}  {:<20} {:>4} posts  {}",
            if v.is_active { "*" } else { " " },
            v.version_id,
            v.source,
            v.tweet_count,
            v.markdown_path.display()
        );
    }
    Ok(())
}

async fn collect_style(ctx: &Arc<AppContext>, handle: &str) -> Result<()> {
    let pipeline = StylePipeline::new(
        StyleCollector::new(ctx.provider(), ctx.clock.clone()),
        StyleAnalyzer::new(&ctx.config.style_output_dir, ctx.clock.clone()).with_llm(ctx.llm.clone()),
        ctx.store.clone(),
    );
    let options = CollectorOptions {
        days: ctx.config.self_style.days,
        max_tweets: ctx.config.self_style.max_tweets,
        include_replies: ctx.config.self_style.include_replies,
    };

    match pipeline
        .run(&StyleTarget::parse(handle), &options, ctx.config.self_style.min_tweets)
        .await?
    {
        StyleRun::Created(version) => {
            println!("Created style guide {} (inactive)", version.version_id);
            println!("  {}", version.markdown_path.display());
            println!("Activate with: persona-agent --activate-style {}", version.version_id);
        }
        StyleRun::NotEnoughPosts { found, required } => {
            println!("Only {} posts found, {} required", found, required);
        }
    }
    Ok(())
}
