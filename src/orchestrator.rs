//! Starts one pair worker per configured copy pair and aggregates their
//! lifecycle: staggered startup, shared shutdown flag, joined exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::info;

use crate::config::AppConfig;
use crate::sync::PairWorker;
use crate::venue::VenueGateway;

/// Delay between worker launches so pairs do not dial the venue at once.
const STARTUP_STAGGER: Duration = Duration::from_millis(500);

pub struct Orchestrator {
    config: AppConfig,
    gateway: Arc<dyn VenueGateway>,
    shutdown: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(config: AppConfig, gateway: Arc<dyn VenueGateway>) -> Self {
        Self {
            config,
            gateway,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag observed by every worker; setting it stops all pairs after
    /// their current cycle.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run every pair worker until the shutdown flag is set, then wait for
    /// all of them to finish their current cycle and exit.
    pub async fn run(self) {
        info!(pairs = self.config.copy_pairs.len(), "starting pair workers");

        let mut handles = Vec::with_capacity(self.config.copy_pairs.len());
        let pair_count = self.config.copy_pairs.len();
        for pair in self.config.copy_pairs {
            let worker = PairWorker::new(pair, self.gateway.clone(), self.shutdown.clone());
            handles.push(tokio::spawn(worker.run()));
            if handles.len() < pair_count {
                tokio::time::sleep(STARTUP_STAGGER).await;
            }
        }

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        join_all(handles).await;
        info!("all pair workers stopped");
    }
}
