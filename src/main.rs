//  █████╗ ██████╗  ██████╗
// ██╔══██╗██╔══██╗██╔════╝
// ███████║██████╔╝██║
// ██╔══██║██╔══██╗██║
// ██║  ██║██║  ██║╚██████╗
// ╚═╝  ╚═╝╚═╝  ╚═╝ ╚═════╝
//
// R E A C T O R
//
// Runs OSINT collection modules, keeps a registry of what every run is doing
// and ships each finding to the SIEM as a CEF syslog event.

mod circuit_breaker;
mod config;
mod dispatch;
mod error;
mod loader;
mod logging;
mod matcher;
mod models;
mod modules;
mod registry;
mod runner;
mod status;
mod syslog;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::dispatch::Dispatcher;
use crate::models::Outcome;
use crate::registry::JobRegistry;
use crate::status::StatusServer;
use crate::syslog::SyslogEmitter;

#[derive(Debug, Parser)]
#[command(name = "arc_reactor", version, about = "OSINT collection dispatcher")]
struct Cli {
    /// Path to the ini configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serve JSON status on this port (overrides `[status] port`).
    #[arg(long)]
    status_port: Option<u16>,

    /// Modules to run. Runs all of them when none are given.
    modules: Vec<String>,
}

fn print_banner() {
    let banner = r#"
    ╔════════════════════════════════════════════════╗
    ║                                                ║
    ║      █████╗ ██████╗  ██████╗                   ║
    ║     ██╔══██╗██╔══██╗██╔════╝                   ║
    ║     ███████║██████╔╝██║        REACTOR         ║
    ║     ██╔══██║██╔══██╗██║                        ║
    ║     ██║  ██║██║  ██║╚██████╗                   ║
    ║     ╚═╝  ╚═╝╚═╝  ╚═╝ ╚═════╝                   ║
    ║                                                ║
    ║   Modules: pastebin | knownbad | otx           ║
    ║   Output:  CEF over UDP syslog                 ║
    ║                                                ║
    ╚════════════════════════════════════════════════╝
    "#;
    println!("{}", banner);
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(port) = cli.status_port {
        config.status_port = port;
    }

    logging::init_tracing(&config.log_path)?;
    print_banner();
    info!(config = %cli.config.display(), "configuration loaded");

    let emitter = Arc::new(SyslogEmitter::new(config.siem_host.clone(), config.siem_port));
    match emitter.test_connection().await {
        Ok(()) => info!(siem = %config.siem_name, target = %emitter.target(), "syslog target reachable"),
        Err(e) => warn!(siem = %config.siem_name, target = %emitter.target(), error = %e, "syslog connection test failed"),
    }

    let registry = Arc::new(JobRegistry::new());
    let dispatcher = Dispatcher::from_config(&config, registry.clone(), emitter.clone())?;

    let selected: Vec<String> = if cli.modules.is_empty() {
        dispatcher.module_names().iter().map(|s| s.to_string()).collect()
    } else {
        cli.modules.clone()
    };
    let available = dispatcher.module_names();
    if let Some(unknown) = selected.iter().find(|m| !available.contains(&m.as_str())) {
        anyhow::bail!(
            "unknown module '{}', expected one of: {}",
            unknown,
            available.join(", ")
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let status_handle = if config.status_port != 0 {
        let listener = StatusServer::bind(config.status_port).await?;
        let server = StatusServer::new(registry.clone(), emitter.clone());
        let mut status_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            server.serve(listener, &mut status_shutdown).await;
        }))
    } else {
        None
    };

    let mut runs = Vec::with_capacity(selected.len());
    for name in &selected {
        runs.push((name.clone(), dispatcher.launch(name, shutdown_rx.clone())?));
    }
    info!(modules = %selected.join(", "), "all modules dispatched");

    let wait_for_runs = async {
        let mut results = Vec::with_capacity(runs.len());
        for (name, handle) in runs {
            results.push((name, handle.await));
        }
        results
    };
    tokio::pin!(wait_for_runs);

    let results = tokio::select! {
        results = &mut wait_for_runs => results,
        signal = signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("signal listener error: {}", e);
            }
            warn!("Ctrl+C signal caught. shutting down");
            let _ = shutdown_tx.send(true);
            match tokio::time::timeout(Duration::from_secs(10), &mut wait_for_runs).await {
                Ok(results) => results,
                Err(_) => {
                    warn!("modules did not stop within 10s");
                    Vec::new()
                }
            }
        }
    };

    for (name, result) in results {
        match result {
            Ok(Ok(Outcome::Success)) => info!(module = %name, "run finished successfully"),
            Ok(Ok(Outcome::PartialFailure)) => warn!(module = %name, "run finished with errors"),
            Ok(Err(e)) => error!(module = %name, error = %e, "run refused"),
            Err(e) => error!(module = %name, error = %e, "run task failed"),
        }
    }

    println!("{}", dispatcher.get_stats("all"));

    let _ = shutdown_tx.send(true);
    if let Some(handle) = status_handle {
        let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
    }

    let sent = emitter.snapshot();
    info!(sent = sent.sent, failed = sent.failed, "arc reactor offline");
    Ok(())
}
