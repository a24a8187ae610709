//! mailsort
//!
//! A self-training SMTP relay. Inbound mail is classified into categories
//! learned from how users file their messages over IMAP, stamped with the
//! outcome and relayed downstream.
//!
//! ## Module Organization
//!
//! - `adapters/`: SMTP, IMAP and SQLite plumbing
//! - `services/`: categorizer, relay pipeline, watchers, training loop
//! - `commands/`: dashboard operations
//! - `api/`: JSON HTTP listener over `commands`
//! - `state/`: wiring of shared components

pub mod adapters;
pub mod api;
pub mod commands;
pub mod config;
pub mod services;
pub mod state;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

use std::path::PathBuf;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::adapters::smtp::listener::{self, ListenerSettings};
use crate::state::AppState;
use crate::types::error::MailsortError;

/// Installs the global subscriber. `RUST_LOG` wins over the build default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("mailsort=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn bind(addr: &str, what: &str) -> Result<TcpListener, MailsortError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| MailsortError::Network(format!("Cannot bind {} listener on {}: {}", what, addr, e)))
}

/// Runs the relay, API, watchers and training loop until Ctrl-C.
pub async fn run(config_path: Option<PathBuf>) -> Result<(), MailsortError> {
    let config = config::load(config_path.as_deref())?;
    config::set_config(config.clone())?;
    info!(
        data_dir = ?config.storage.data_dir,
        accounts = config.accounts.len(),
        "Starting mailsort"
    );

    let shutdown = CancellationToken::new();
    let (state, events) = AppState::build(config.clone(), shutdown.clone())?;
    let mut tasks = Vec::new();

    let smtp = bind(&config.smtp.bind, "SMTP").await?;
    tasks.push(tokio::spawn(listener::serve(
        smtp,
        ListenerSettings {
            hostname: config.smtp.hostname.clone(),
            max_message_bytes: config.smtp.max_message_bytes,
        },
        state.relay.clone(),
        shutdown.clone(),
    )));

    if config.api.enabled {
        let api = bind(&config.api.bind, "API").await?;
        tasks.push(tokio::spawn(api::serve(api, state.clone(), shutdown.clone())));
    }

    state.orchestrator.bootstrap()?;
    if let Some(watchers) = &state.watchers {
        let targets = state.orchestrator.watch_targets()?;
        watchers.start(&targets).await;
    }

    let orchestrator = state.orchestrator.clone();
    let training = tokio::spawn(orchestrator.run(shutdown.clone(), events));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for Ctrl-C, shutting down");
    }
    info!("Shutting down");
    shutdown.cancel();

    if let Some(watchers) = &state.watchers {
        watchers.stop().await;
    }
    for task in tasks {
        match task.await {
            Ok(Err(e)) => error!(error = %e, "Listener failed"),
            Err(e) => error!(error = %e, "Listener task panicked"),
            Ok(Ok(())) => {}
        }
    }
    if let Err(e) = training.await {
        error!(error = %e, "Training loop panicked");
    }
    info!("Stopped");
    Ok(())
}
