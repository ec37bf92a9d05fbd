// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The `fbchain` binary: runs any function-block stage, the control plane,
//! the DLQ replayer, or the DLQ inventory tool.

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use fbc_config::spec::PipelineSpecDoc;
use fbc_controlplane::ControlPlaneOptions;
use fbc_dlq::replay::{self, ReplayOptions};
use fbc_dlq::store::{DlqStore, ScanFilter};
use fbc_runtime::runner::{StageOptions, run_stage};
use fbc_runtime::stage::{LogReloadFn, RuntimeSettings};
use fbc_stages::build_processor;
use miette::miette;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "fbchain", version, about = "Modular telemetry processing pipeline")]
struct Cli {
    /// Log level when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit structured JSON logs.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one function-block stage.
    Stage(StageArgs),
    /// Run the control plane.
    Controller(ControllerArgs),
    /// Re-inject captured DLQ batches at the pipeline head.
    Replay(ReplayArgs),
    /// Summarize the DLQ store contents.
    DlqInventory(InventoryArgs),
}

#[derive(Args)]
struct StageArgs {
    /// Function-block name (e.g. fb-rx, fb-dp, fb-gw, fb-dlq).
    #[arg(long)]
    name: String,

    /// Ingress RPC listener.
    #[arg(long, default_value = "0.0.0.0:4317")]
    listen: SocketAddr,

    /// Admin HTTP listener (/metrics, /health, /ready).
    #[arg(long, default_value = "0.0.0.0:8080")]
    admin_listen: SocketAddr,

    /// Control-plane endpoint; omit for static deployments.
    #[arg(long)]
    control_plane: Option<String>,

    /// Pipeline spec document applied as the initial configuration.
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Bound of the per-stage work queue.
    #[arg(long, default_value_t = 256)]
    queue_capacity: usize,

    /// Grace period for in-flight batches on shutdown.
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    drain_window: Duration,
}

#[derive(Args)]
struct ControllerArgs {
    /// Config-service listener.
    #[arg(long, default_value = "0.0.0.0:4320")]
    listen: SocketAddr,

    /// The declarative pipeline spec document to watch.
    #[arg(long)]
    spec_file: PathBuf,

    /// Lease file enabling leader election.
    #[arg(long)]
    lease_file: Option<PathBuf>,

    /// Identity in the lease; defaults to a random id.
    #[arg(long)]
    identity: Option<String>,
}

#[derive(Args)]
struct ReplayArgs {
    /// DLQ store path.
    #[arg(long)]
    store_path: PathBuf,

    /// Pipeline-head (fb-rx) endpoint.
    #[arg(long)]
    target: String,

    /// Only replay records with this error code.
    #[arg(long)]
    error_code: Option<String>,

    /// Only replay records routed by this stage.
    #[arg(long)]
    fb_sender: Option<String>,

    /// Only replay records captured at or after this RFC-3339 instant.
    #[arg(long)]
    since: Option<String>,

    /// Only replay records captured before this RFC-3339 instant.
    #[arg(long)]
    until: Option<String>,

    /// Worker count.
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Per-worker sleep between batches.
    #[arg(long, default_value = "0s", value_parser = humantime::parse_duration)]
    throttle: Duration,

    /// Walk the filter without writing.
    #[arg(long)]
    dry_run: bool,

    /// Delete records the head accepted.
    #[arg(long)]
    delete_replayed: bool,
}

#[derive(Args)]
struct InventoryArgs {
    /// DLQ store path.
    #[arg(long)]
    store_path: PathBuf,
}

/// Initializes the subscriber and returns the hook through which hot
/// `log_level` changes are applied.
fn init_tracing(level: &str, json: bool) -> LogReloadFn {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let initial = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let (filter, handle) = tracing_subscriber::reload::Layer::new(initial);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    Arc::new(move |requested: &str| {
        match tracing_subscriber::EnvFilter::try_new(requested) {
            Ok(new_filter) => {
                let _ = handle.reload(new_filter);
            }
            Err(e) => tracing::warn!(level = requested, error = %e, "invalid log level from config"),
        }
    })
}

fn parse_instant(value: &str) -> miette::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| miette!("invalid RFC-3339 instant `{value}`: {e}"))
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let log_reload = init_tracing(&cli.log_level, cli.log_json);

    match cli.command {
        Command::Stage(args) => stage(args, log_reload).await,
        Command::Controller(args) => controller(args).await,
        Command::Replay(args) => replay_command(args).await,
        Command::DlqInventory(args) => inventory(args).await,
    }
}

async fn stage(args: StageArgs, log_reload: LogReloadFn) -> miette::Result<()> {
    let processor = build_processor(&args.name).map_err(|e| miette!("{e}"))?;
    let initial_config = match &args.config_file {
        Some(path) => {
            let doc = PipelineSpecDoc::load_file(path)?;
            doc.validate()?;
            Some(doc.to_wire_config()?)
        }
        None => None,
    };
    let options = StageOptions {
        listen: args.listen,
        admin_listen: args.admin_listen,
        control_plane: args.control_plane,
        initial_config,
        runtime: RuntimeSettings {
            queue_capacity: args.queue_capacity,
            drain_window: args.drain_window,
            ..RuntimeSettings::default()
        },
        on_log_level: Some(log_reload),
    };
    run_stage(options, processor)
        .await
        .map_err(|e| miette!("{e}"))
}

async fn controller(args: ControllerArgs) -> miette::Result<()> {
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    let _ = tokio::spawn(async move {
        fbc_runtime::lifecycle::shutdown_signal(signal_cancel.clone()).await;
        signal_cancel.cancel();
    });
    let options = ControlPlaneOptions {
        listen: args.listen,
        spec_path: args.spec_file,
        lease_path: args.lease_file,
        identity: args
            .identity
            .unwrap_or_else(|| format!("controller-{}", uuid::Uuid::new_v4())),
    };
    // A lost lease must surface as a non-zero exit to force re-election.
    fbc_controlplane::run(options, cancel).await?;
    Ok(())
}

#[allow(clippy::print_stdout)]
async fn replay_command(args: ReplayArgs) -> miette::Result<()> {
    let store = DlqStore::open_disk(&args.store_path).map_err(|e| miette!("{e}"))?;
    let filter = ScanFilter {
        since: args.since.as_deref().map(parse_instant).transpose()?,
        until: args.until.as_deref().map(parse_instant).transpose()?,
        error_code: args.error_code,
        fb_sender: args.fb_sender,
    };
    let stats = replay::run(
        &store,
        ReplayOptions {
            filter,
            concurrency: args.concurrency,
            throttle: args.throttle,
            dry_run: args.dry_run,
            delete_replayed: args.delete_replayed,
            target: args.target,
        },
    )
    .await
    .map_err(|e| miette!("{e}"))?;
    store.flush().await.map_err(|e| miette!("{e}"))?;

    println!("scanned:  {}", stats.scanned);
    println!("replayed: {}", stats.replayed);
    println!("deleted:  {}", stats.deleted);
    println!("errors:   {}", stats.errors);
    for (code, count) in &stats.failures_by_code {
        println!("  {code}: {count}");
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
async fn inventory(args: InventoryArgs) -> miette::Result<()> {
    let store = DlqStore::open_disk(&args.store_path).map_err(|e| miette!("{e}"))?;
    let inventory = store.inventory().await.map_err(|e| miette!("{e}"))?;
    println!("records: {}", inventory.records);
    println!("poison:  {}", inventory.poison);
    println!("by error code:");
    for (code, count) in &inventory.by_error_code {
        println!("  {code}: {count}");
    }
    println!("by sender:");
    for (sender, count) in &inventory.by_fb_sender {
        println!("  {sender}: {count}");
    }
    Ok(())
}
