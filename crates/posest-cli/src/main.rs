//! `posest-cli` – Pose-source arbiter entry point
//!
//! This binary runs the arbiter against a rosbridge server.  It:
//!
//! 1. Loads `~/.posest/config.toml` (or `$POSEST_CONFIG`) and applies
//!    `POSEST_*` overrides.
//! 2. Starts the feed ingestors, the status reporter and, when publishing is
//!    enabled for a republishing mode, the 50 Hz publish scheduler.
//! 3. Bridges everything to ROS through rosbridge until **Ctrl-C**.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use posest_kernel::{FeedStore, FreshnessTracker, ReferenceMirror, SanityChecker, SourceSelector};
use posest_middleware::{BusPoseSink, EventBus, PoseSink, RosbridgeClient, Topic};
use posest_runtime::{FeedIngestor, PublishGate, PublishScheduler, StatusReporter};

use config::Config;

fn main() -> ExitCode {
    // RUST_LOG filters, POSEST_LOG_FORMAT=json switches to JSON lines and
    // OTEL_EXPORTER_OTLP_ENDPOINT enables span export.
    let _telemetry = posest_runtime::init_tracing("posest");

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_usage();
        return ExitCode::SUCCESS;
    }
    if args.iter().any(|a| a == "--write-default-config") {
        let path = config::config_path();
        return match config::save_to(&Config::default(), &path) {
            Ok(()) => {
                println!("  {} {}", "✓ Default config written to".green(), path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {}", "Config error".red(), e);
                ExitCode::FAILURE
            }
        };
    }
    if let Some(unknown) = args.first() {
        eprintln!("{}: unknown argument '{}'", "Error".red(), unknown);
        print_usage();
        return ExitCode::FAILURE;
    }

    print_banner();

    let path = config::config_path();
    if path.exists() {
        println!("  Config loaded from {}", path.display().to_string().bold());
    } else {
        println!(
            "  No config at {}; using defaults.",
            path.display().to_string().dimmed()
        );
    }
    let cfg = match config::load_or_default().and_then(|cfg| cfg.validate().map(|()| cfg)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    print_summary(&cfg);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: failed to start Tokio runtime: {}", "Error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run(cfg));
    ExitCode::SUCCESS
}

/// Install the Ctrl-C handler and drive the pipeline until shutdown.
async fn run(cfg: Config) {
    // Held until the pipeline ends, handler or not: dropping the last sender
    // stops every task.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    install_ctrlc_handler(shutdown_tx.clone());
    run_until(cfg, shutdown_rx).await;
    drop(shutdown_tx);
    println!("{}", "  ✓ Exiting posest.".green());
}

fn install_ctrlc_handler(shutdown_tx: watch::Sender<bool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        let _ = shutdown_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }
}

/// Assemble the pipeline and drive it until `shutdown` flips to `true`.
async fn run_until(cfg: Config, shutdown_rx: watch::Receiver<bool>) {
    // ── Shared state ──────────────────────────────────────────────────────
    let bus = Arc::new(EventBus::default());
    let selector = SourceSelector::new(cfg.mode);
    let feeds = selector.policy().feeds();
    let store = Arc::new(FeedStore::new(feeds.iter().copied()));
    let reference = Arc::new(ReferenceMirror::new());
    let freshness = FreshnessTracker::new(Arc::clone(&store), cfg.freshness_timeout());

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // ── Ingestion ─────────────────────────────────────────────────────────
    let ingestor = FeedIngestor::new(Arc::clone(&store), Arc::clone(&reference));
    for topic in [Topic::Feeds, Topic::Reference] {
        tasks.push(tokio::spawn(
            ingestor.clone().run(bus.subscribe_to(topic), shutdown_rx.clone()),
        ));
    }

    // ── Publishing ────────────────────────────────────────────────────────
    let gate = PublishGate::new(
        SourceSelector::new(cfg.mode),
        freshness.clone(),
        SanityChecker::with_default_rules(cfg.max_position_variance),
    );
    let sink: Arc<dyn PoseSink> = Arc::new(BusPoseSink::new(Arc::clone(&bus)));
    let scheduler = PublishScheduler::arm(cfg.publish, gate, sink, cfg.tick_period());

    let mut reporter = StatusReporter::new(
        selector,
        freshness,
        SanityChecker::with_default_rules(cfg.max_position_variance),
        Arc::clone(&reference),
        cfg.publish,
    )
    .with_interval(cfg.status_interval());

    // The client listens for vision poses before the scheduler's first tick.
    let client = RosbridgeClient::new(
        cfg.rosbridge_url.clone(),
        Arc::clone(&bus),
        cfg.topics.subscriptions(cfg.mode, &feeds),
        scheduler.as_ref().map(|_| cfg.topics.vision_pose.clone()),
    );
    tasks.push(tokio::spawn(client.run(shutdown_rx.clone())));

    if let Some(scheduler) = scheduler {
        reporter = reporter.with_outcomes(scheduler.subscribe());
        tasks.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));
    }

    tasks.push(tokio::spawn(reporter.run(shutdown_rx.clone(), |report| {
        println!("{report}\n");
    })));

    info!(mode = %cfg.mode, url = %cfg.rosbridge_url, "arbiter running");

    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "task terminated abnormally");
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", "  ╔════════════════════════════════════════╗".cyan());
    println!("{}", "  ║      posest – pose source arbiter      ║".cyan().bold());
    println!("{}", "  ╚════════════════════════════════════════╝".cyan());
    println!();
}

fn print_summary(cfg: &Config) {
    println!(
        "  Mode: {} [{}]   Publish: {}",
        cfg.mode.to_string().bold(),
        cfg.mode.index(),
        if cfg.publish { "on".green() } else { "off".yellow() }
    );
    println!(
        "  Tick: {} ms   Timeout: {} ms   rosbridge: {}",
        cfg.tick_ms,
        cfg.freshness_timeout_ms,
        cfg.rosbridge_url.dimmed()
    );
    println!();
}

fn print_usage() {
    println!("Usage: posest [--write-default-config | --help]");
    println!();
    println!("  --write-default-config   Write a default config to {}", config::config_path().display());
    println!("  -h, --help               Show this help");
    println!();
    println!("Environment: POSEST_CONFIG, POSEST_MODE, POSEST_PUBLISH, POSEST_ROSBRIDGE_URL,");
    println!("             POSEST_TICK_MS, POSEST_TIMEOUT_MS, POSEST_LOG_FORMAT, RUST_LOG");
}
