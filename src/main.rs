// Author: Quayside contributors
// License: MIT

mod cli;
mod config;
mod core;
mod error;
mod logging;
mod managers;
mod transport;

use std::sync::Arc;

use clap::Parser;

use core::daemon::Daemon;
use error::AnyError;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let args = cli::Args::parse();

    // Root execution is refused (spec.md §6, §7: "the process is started as
    // root" is the one other reason `main` exits non-zero).
    if unsafe { libc::geteuid() } == 0 {
        eprintln!("quayside: refusing to run as root");
        std::process::exit(1);
    }

    eventline::runtime::init().await;

    eventline::runtime::enable_console_output(!args.no_console);
    eventline::runtime::set_log_level(if args.verbose {
        eventline::runtime::LogLevel::Debug
    } else {
        eventline::runtime::LogLevel::Info
    });

    if let Some(path) = logging::default_log_path() {
        let needs_blank =
            logging::prepare_log_file(&path, logging::LogPolicy::default()).unwrap_or(false);

        if let Err(e) = eventline::runtime::enable_file_output(&path) {
            eventline::error!("failed to enable file logging: {e}");
        } else {
            if needs_blank {
                let _ = logging::write_raw_blank_line(&path);
            }
            let _ = logging::write_raw_line(&path, &logging::run_header());
        }
    }

    eventline::info!("quayside starting (pid={})", std::process::id());

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::resolve_default_config_path);

    let mut daemon_config = config::load(&config_path).unwrap_or_else(|e| {
        eventline::error!("{e}, falling back to defaults");
        config::DaemonConfig::default()
    });
    if let Some(name) = args.socket_name.clone() {
        daemon_config.socket_name = name;
    }

    let daemon = Arc::new(Daemon::new(&daemon_config).await);
    eventline::info!(
        "quayside ready: capabilities = {:?}",
        daemon.capabilities()
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut daemon_task = tokio::spawn({
        let daemon = Arc::clone(&daemon);
        async move { daemon.run(shutdown_rx).await }
    });

    tokio::select! {
        res = &mut daemon_task => {
            match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(join_err) => Err(Box::new(join_err) as AnyError),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            eventline::info!("received Ctrl+C, shutting down");
            let _ = shutdown_tx.send(true);
            match daemon_task.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(join_err) => Err(Box::new(join_err) as AnyError),
            }
        }
    }
}
