//! Error taxonomy for venue access, reconciliation, and configuration.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::Ticket;

/// Errors surfaced by venue transports and the session pool.
#[derive(Debug, Error)]
pub enum VenueError {
    /// Session acquisition or authentication failed.
    #[error("connect failed for {account}: {reason}")]
    ConnectFailed { account: String, reason: String },

    /// Position or quote listing failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// The venue refused an open/close/modify request.
    #[error("order rejected: {0}")]
    OrderRejected(String),
}

/// Errors raised by a reconciliation cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Venue(#[from] VenueError),

    /// An accepted open order produced no observable ticket within the
    /// confirmation window. The order may have filled; requires attention.
    #[error("no fill observed for source ticket {source_ticket} ({symbol}) within the confirmation window")]
    ConfirmationTimeout { source_ticket: Ticket, symbol: String },
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file did not exist. A placeholder template has been
    /// written to `template`; the operator must fill it in and restart.
    #[error(
        "config file {} not found; template written to {}, fill it in and restart",
        .path.display(),
        .template.display()
    )]
    Missing { path: PathBuf, template: PathBuf },

    #[error("failed to read config file: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to write config file: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
