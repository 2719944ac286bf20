mod checkpoint;
mod cli;
mod config;
mod desktop;
mod error;
mod recovery;
mod state_machine;
mod steps;
mod ui;
mod work_item;
mod workflow;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use checkpoint::CheckpointStore;
use cli::{Cli, Command};
use config::PilotConfig;
use desktop::{ArtifactUploader, Desktop, LocalUploader, SimulatedDesktop, SystemClock, templates};
use state_machine::epoch_seconds;
use ui::RunProgress;
use workflow::{QueueDirs, RunSummary, WorkflowDriver, standard_machine};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = PilotConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(max_retries) = cli.max_retries {
        config.retry.max_retries = max_retries;
    }

    match cli.command {
        Command::Run { simulate, faults } => {
            if !simulate {
                bail!("no screen driver is available in this build; rerun with --simulate");
            }
            let sim = SimulatedDesktop::new();
            for fault in &faults {
                sim.fail_template(&fault.template, fault.times);
            }
            let summary = run_queue(&config, sim.desktop(Arc::new(SystemClock))).await?;
            if summary.has_failures() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Status => status(&config)?,
        Command::Checkpoints { clear, expired } => {
            let store = checkpoint_store(&config);
            if clear {
                let removed = store.clear()?;
                println!("{removed} checkpoint(s) removidos");
            } else if expired {
                let removed = store.purge_expired(epoch_seconds())?;
                println!("{removed} checkpoint(s) expirados removidos");
            } else {
                ui::print_checkpoints(&store)?;
            }
        }
        Command::Demo => demo(config).await?,
    }

    Ok(ExitCode::SUCCESS)
}

/// Logs go to stderr; the terminal UI owns stdout.
fn init_tracing(verbose: bool) {
    let default = if verbose { "b1pilot=debug" } else { "b1pilot=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn checkpoint_store(config: &PilotConfig) -> CheckpointStore {
    CheckpointStore::new(config.checkpoint_dir(), config.checkpoint_expiry())
}

fn uploader(config: &PilotConfig) -> Option<Arc<dyn ArtifactUploader>> {
    if !config.upload.enabled {
        return None;
    }
    let target = config
        .upload
        .target_dir
        .clone()
        .unwrap_or_else(|| config.base_dir().join("uploaded"));
    Some(Arc::new(LocalUploader::new(target)))
}

/// One pass over the queue on a blocking task; Ctrl-C stops before the next
/// item.
async fn run_queue(config: &PilotConfig, desktop: Desktop) -> Result<RunSummary> {
    let mut machine = standard_machine(config, desktop, uploader(config));
    let progress = RunProgress::start("Lendo fila de pedidos");
    machine.on_enter(progress.state_hook());

    let mut driver = WorkflowDriver::new(config, machine);
    driver.on_item(progress.item_hook());

    let stop = driver.stop_flag();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current item");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let summary = tokio::task::spawn_blocking(move || driver.run())
        .await
        .context("queue driver task failed")??;
    watcher.abort();

    progress.complete(&summary);
    progress.print_summary(&summary);
    Ok(summary)
}

fn status(config: &PilotConfig) -> Result<()> {
    println!("Base: {}", config.base_dir().display());
    println!(
        "max_retries={} circuit_threshold={} checkpoint_expiry={}s max_iterations={}",
        config.retry.max_retries,
        config.recovery.circuit_threshold,
        config.checkpoint.expiry_secs,
        config.machine.max_iterations,
    );
    println!();
    ui::print_queue(&QueueDirs::from_config(&config.queue));
    println!();
    ui::print_checkpoints(&checkpoint_store(config))?;
    Ok(())
}

/// Runs the simulated pipeline against a throwaway queue: one clean order,
/// one that needs a recovery, one malformed file.
async fn demo(mut config: PilotConfig) -> Result<()> {
    let base: PathBuf = std::env::temp_dir().join(format!("b1pilot-demo-{}", uuid::Uuid::new_v4()));
    config.queue.base_dir = base.clone();
    config.automation.settle_ms = 50;
    config.automation.poll_interval_ms = 100;
    config.automation.template_timeout_ms = 500;
    config.recovery.template_backoff_ms = 200;

    let dirs = QueueDirs::from_config(&config.queue);
    dirs.ensure()?;
    for (name, body) in demo_orders() {
        std::fs::write(dirs.pending.join(name), body)
            .with_context(|| format!("writing demo order {name}"))?;
    }
    info!(base = %base.display(), "demo queue created");

    let sim = SimulatedDesktop::new();
    // outlasts the first wait on order_001 so one recovery runs
    sim.fail_template(templates::NIT_FIELD, 6);
    run_queue(&config, sim.desktop(Arc::new(SystemClock))).await?;

    println!();
    println!("Arquivos da demonstração em {}", base.display());
    Ok(())
}

fn demo_orders() -> Vec<(&'static str, String)> {
    let order = |nit: &str, number: &str, date: &str, items: serde_json::Value| {
        serde_json::json!({
            "nit": nit,
            "order_number": number,
            "delivery_date": date,
            "items": items,
        })
        .to_string()
    };
    vec![
        (
            "order_001.json",
            order(
                "900123456",
                "OC-1001",
                "2024-03-15",
                serde_json::json!([
                    {"code": "A-100", "quantity": 2},
                    {"code": "B-200", "quantity": 1.5, "price": 12.5}
                ]),
            ),
        ),
        (
            "order_002.json",
            order(
                "800987654",
                "OC-1002",
                "20/03/2024",
                serde_json::json!([{"code": "C-300", "quantity": 10}]),
            ),
        ),
        ("order_003.json", "{\"nit\": \"800\", \"items\": [".to_string()),
    ]
}
