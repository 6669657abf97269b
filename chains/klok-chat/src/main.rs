use anyhow::{Context, Result};
use clap::Parser;
use core_logic::{
    setup_logger, ConcurrencyGate, LaunchPolicy, MetricsCollector, Scheduler, StatusRegistry,
    ACCOUNT_TARGET,
};
use dialoguer::{theme::ColorfulTheme, Input};
use dotenv::dotenv;
use klok_chat::{
    build_workers, AccountContext, ChatSettings, EthersSigner, KlokConfig, RunInputs,
};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

const DEFAULT_THREADS: usize = 4;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "chains/klok-chat/config.toml")]
    config: String,
    /// Max accounts running at once (overrides config).
    #[arg(short, long)]
    threads: Option<usize>,
    /// `staggered` or `immediate` (overrides config).
    #[arg(long)]
    policy: Option<LaunchPolicy>,
    #[arg(short, long)]
    export_metrics: Option<String>,
    #[arg(long, default_value = "30")]
    metrics_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = setup_logger();
    dotenv().ok();

    let args = Args::parse();
    info!(target: ACCOUNT_TARGET, "Loading config from: {}", args.config);

    let config = KlokConfig::load(&args.config).context("Failed to load config")?;

    let inputs = match RunInputs::load(&config) {
        Ok(inputs) => inputs,
        Err(e) => {
            error!("Startup failed: {}", e);
            return Err(e).context("Could not load run inputs");
        }
    };
    let proxies = &inputs.proxies;

    info!(
        target: ACCOUNT_TARGET,
        "Loaded {} wallets and {} messages",
        inputs.wallets.count(),
        inputs.messages.len()
    );
    if proxies.is_empty() {
        info!(target: ACCOUNT_TARGET, "🌐 No proxies loaded, using direct connections");
    } else {
        info!(target: ACCOUNT_TARGET, "🌐 Loaded {} proxies", proxies.len());
    }

    let threads = resolve_threads(args.threads, config.threads)?;
    let policy = args.policy.unwrap_or(config.launch_policy);

    let gate = Arc::new(ConcurrencyGate::new(threads));
    let registry = Arc::new(StatusRegistry::new());
    let metrics = Arc::new(MetricsCollector::new());

    let ctx = AccountContext::new(
        Arc::new(EthersSigner),
        inputs.messages.clone(),
        Arc::clone(&registry),
        ChatSettings::from(&config),
    )
    .with_gate(Arc::clone(&gate))
    .with_metrics(Arc::clone(&metrics));

    let workers = build_workers(inputs.identities(), &config, &ctx);

    let scheduler = Scheduler::new(Arc::clone(&gate), Arc::clone(&registry))
        .with_stagger(config.account_delay())
        .with_policy(policy);

    let metrics_task = args.export_metrics.clone().map(|path| {
        let metrics = Arc::clone(&metrics);
        let interval_secs = args.metrics_interval.max(1);
        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                if let Err(e) = metrics.export_to_file(&path).await {
                    warn!("Metrics export failed: {}", e);
                }
            }
        })
    });

    info!(
        target: ACCOUNT_TARGET,
        "🚀 Starting {} accounts | max concurrent: {} | launch: {}",
        workers.len(),
        threads,
        policy
    );

    let summary = scheduler.run(workers).await;

    if let Some(task) = metrics_task {
        task.abort();
    }

    info!(target: ACCOUNT_TARGET, "=== Final Status ===");
    for entry in registry.all().await {
        info!(target: ACCOUNT_TARGET, "{}", entry);
    }
    info!(
        target: ACCOUNT_TARGET,
        "✨ All accounts finished in {:.1}s | Completed: {} | Daily Limit Reached: {} | Failed: {} | Peak concurrency: {}/{}",
        summary.elapsed.as_secs_f64(),
        summary.tally.completed,
        summary.tally.daily_limit_reached,
        summary.tally.failed,
        summary.peak_active,
        threads
    );
    let chats = metrics.snapshot().chats;
    info!(
        target: ACCOUNT_TARGET,
        "Messages sent: {} | failed iterations: {} | success rate: {:.1}%",
        chats.success,
        chats.failed,
        chats.success_rate
    );

    if let Some(path) = &args.export_metrics {
        match metrics.export_to_file(path).await {
            Ok(()) => info!(target: ACCOUNT_TARGET, "Metrics exported to {}", path),
            Err(e) => error!("Metrics export failed: {}", e),
        }
    }

    Ok(())
}

/// CLI flag, then config, then an interactive prompt.
fn resolve_threads(cli: Option<usize>, configured: Option<usize>) -> Result<usize> {
    if let Some(threads) = cli.or(configured) {
        anyhow::ensure!(threads > 0, "threads must be at least 1");
        return Ok(threads);
    }

    match Input::<usize>::with_theme(&ColorfulTheme::default())
        .with_prompt("How many threads do you want to run?")
        .default(DEFAULT_THREADS)
        .interact_text()
    {
        Ok(0) => {
            warn!("0 threads requested, using 1");
            Ok(1)
        }
        Ok(threads) => Ok(threads),
        Err(_) => {
            warn!(
                "Cannot prompt for thread count (not a terminal), using {}",
                DEFAULT_THREADS
            );
            Ok(DEFAULT_THREADS)
        }
    }
}
