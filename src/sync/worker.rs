//! Pair worker: drives one reconciliation engine on a fixed cadence and
//! isolates its failures from every other pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::CopyPairConfig;
use crate::error::SyncError;
use crate::venue::VenueGateway;

use super::engine::SyncEngine;

/// Owns one [`SyncEngine`] and runs it until the shared stop flag is set.
///
/// Every cycle error is caught here: snapshot failures are retried on the
/// next tick, unexpected failures additionally back off before retrying.
/// Nothing a worker does can take the process down.
pub struct PairWorker {
    pair_id: String,
    engine: SyncEngine,
    interval: Duration,
    error_backoff: Duration,
    stop: Arc<AtomicBool>,
}

impl PairWorker {
    pub fn new(pair: CopyPairConfig, gateway: Arc<dyn VenueGateway>, stop: Arc<AtomicBool>) -> Self {
        let interval = Duration::from_millis(pair.settings.sync_interval_ms);
        let error_backoff = Duration::from_millis(pair.settings.error_backoff_ms);
        let pair_id = pair.id.clone();
        Self {
            pair_id,
            engine: SyncEngine::new(pair, gateway, stop.clone()),
            interval,
            error_backoff,
            stop,
        }
    }

    pub async fn run(mut self) {
        info!(pair = %self.pair_id, "worker starting");

        match self.engine.adopt_existing().await {
            Ok(0) => {}
            Ok(adopted) => {
                info!(pair = %self.pair_id, adopted, "adopted positions from a previous run")
            }
            Err(e) => {
                warn!(
                    pair = %self.pair_id,
                    error = %e,
                    "restart adoption failed, continuing with an empty ledger"
                )
            }
        }

        while !self.stop.load(Ordering::SeqCst) {
            match self.engine.run_cycle().await {
                Ok(report) if report.is_quiet() => {
                    debug!(pair = %self.pair_id, "cycle complete")
                }
                Ok(report) => {
                    info!(
                        pair = %self.pair_id,
                        copied = report.copied,
                        closed = report.closed,
                        modified = report.modified,
                        skipped = report.skipped,
                        failures = report.failures,
                        "cycle complete"
                    )
                }
                Err(SyncError::Venue(e)) => {
                    // Snapshot-level failure: nothing was mutated, retry on
                    // the next tick.
                    warn!(pair = %self.pair_id, error = %e, "cycle aborted");
                }
                Err(e) => {
                    error!(pair = %self.pair_id, error = %e, "unexpected cycle failure");
                    tokio::time::sleep(self.error_backoff).await;
                }
            }

            tokio::time::sleep(self.interval).await;
        }

        info!(pair = %self.pair_id, "worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccountConfig, PairSettings};
    use crate::models::Side;
    use crate::venue::{PooledVenue, SimVenue};
    use rust_decimal_macros::dec;

    fn pair_config() -> CopyPairConfig {
        CopyPairConfig {
            id: "pair-1".to_string(),
            source: AccountConfig {
                login: 1,
                server: "Test-Server".to_string(),
                password: String::new(),
                password_env: None,
            },
            target: AccountConfig {
                login: 2,
                server: "Test-Server".to_string(),
                password: String::new(),
                password_env: None,
            },
            settings: PairSettings::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_copies_then_stops() {
        let venue = Arc::new(SimVenue::new());
        venue.set_quote("EURUSD", dec!(1.1000), dec!(1.1002));
        venue.seed_position("1@Test-Server", 1001, "EURUSD", Side::Long, dec!(1.0), dec!(0), dec!(0));

        let stop = Arc::new(AtomicBool::new(false));
        let worker = PairWorker::new(
            pair_config(),
            Arc::new(PooledVenue::new(venue.clone())),
            stop.clone(),
        );
        let handle = tokio::spawn(worker.run());

        // Let a few cycles elapse, then request shutdown.
        tokio::time::sleep(Duration::from_secs(2)).await;
        stop.store(true, Ordering::SeqCst);
        handle.await.unwrap();

        assert_eq!(venue.stats().opens_submitted, 1);
        assert_eq!(venue.open_positions("2@Test-Server").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_survives_venue_failures() {
        let venue = Arc::new(SimVenue::new());
        venue.set_quote("EURUSD", dec!(1.1000), dec!(1.1002));
        venue.seed_position("1@Test-Server", 1001, "EURUSD", Side::Long, dec!(1.0), dec!(0), dec!(0));
        venue.fail_queries(5);

        let stop = Arc::new(AtomicBool::new(false));
        let worker = PairWorker::new(
            pair_config(),
            Arc::new(PooledVenue::new(venue.clone())),
            stop.clone(),
        );
        let handle = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_secs(5)).await;
        stop.store(true, Ordering::SeqCst);
        handle.await.unwrap();

        // Early cycles aborted, later ones recovered and copied.
        assert_eq!(venue.stats().opens_submitted, 1);
    }
}
