//! Reconciliation engine: diffs the source account's live positions against
//! the copy ledger and issues open/close/modify actions against the target.
//!
//! One cycle snapshots both accounts, then runs three passes: copy new
//! source positions, close tracked positions whose source vanished, and
//! propagate stop-level changes. The ledger is mutated only on confirmed
//! outcomes, so re-running a cycle after any failure reissues the same
//! intended action and nothing else.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::config::CopyPairConfig;
use crate::error::SyncError;
use crate::models::{OrderSpec, Position, PositionSnapshot, Ticket};
use crate::venue::{with_retry, RetryPolicy, VenueGateway};

use super::ledger::{CopyLink, CopyTag, Ledger};

/// Outcome counters for one reconciliation cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleReport {
    pub copied: u32,
    pub closed: u32,
    pub modified: u32,
    pub skipped: u32,
    pub failures: u32,
}

impl CycleReport {
    pub fn is_quiet(&self) -> bool {
        self.copied == 0 && self.closed == 0 && self.modified == 0 && self.failures == 0
    }
}

/// Per-pair reconciliation state machine. Owns the ledger exclusively.
pub struct SyncEngine {
    pair: CopyPairConfig,
    gateway: Arc<dyn VenueGateway>,
    retry: RetryPolicy,
    ledger: Ledger,
    stop: Arc<AtomicBool>,
    last_sync: Option<DateTime<Utc>>,
}

impl SyncEngine {
    pub fn new(pair: CopyPairConfig, gateway: Arc<dyn VenueGateway>, stop: Arc<AtomicBool>) -> Self {
        let retry = RetryPolicy::from_settings(&pair.settings);
        Self {
            pair,
            gateway,
            retry,
            ledger: Ledger::new(),
            stop,
            last_sync: None,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Rebuild the ledger from live target positions after a restart.
    ///
    /// Target positions carrying this pair's copy tag are re-adopted; their
    /// cached stop levels are seeded from the target side and converge to
    /// the source on the next modify pass. Adopted entries whose source
    /// ticket is already gone retire through the normal close pass.
    pub async fn adopt_existing(&mut self) -> Result<usize, SyncError> {
        let source = self.gateway.list_positions(&self.pair.source, None).await?;
        let target = self.gateway.list_positions(&self.pair.target, None).await?;

        let mut adopted = 0;
        for position in target.iter() {
            let Some(tag) = CopyTag::parse(&position.comment) else {
                continue;
            };
            if tag.pair_id != self.pair.id {
                continue;
            }
            let link = CopyLink::new(position.ticket, position.stop_loss, position.take_profit);
            if self.ledger.track(tag.source_ticket, link) {
                adopted += 1;
                if source.contains(tag.source_ticket) {
                    info!(
                        pair = %self.pair.id,
                        source_ticket = tag.source_ticket,
                        target_ticket = position.ticket,
                        "adopted tracked position"
                    );
                } else {
                    info!(
                        pair = %self.pair.id,
                        source_ticket = tag.source_ticket,
                        target_ticket = position.ticket,
                        "adopted orphaned position, source is flat; will close"
                    );
                }
            }
        }
        Ok(adopted)
    }

    /// Run one reconciliation cycle. A failed snapshot aborts the cycle
    /// with the ledger untouched; per-position failures are counted in the
    /// report and retried naturally on the next cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, SyncError> {
        let mut report = CycleReport::default();

        let source = self.gateway.list_positions(&self.pair.source, None).await?;
        let target = self.gateway.list_positions(&self.pair.target, None).await?;

        self.process_new(&source, &mut report).await;
        if self.stop_requested() {
            return Ok(report);
        }

        self.process_closed(&source, &target, &mut report).await;
        if self.stop_requested() {
            return Ok(report);
        }

        if self.pair.settings.sync_stop_levels {
            self.process_modifications(&source, &target, &mut report).await;
        }

        self.last_sync = Some(Utc::now());
        Ok(report)
    }

    /// Reject reasons are stable across cycles: a skipped position stays
    /// skipped until its ticket disappears or its stop levels change.
    fn filter(&self, position: &Position) -> Option<&'static str> {
        let settings = &self.pair.settings;
        if !settings.symbol_filter.is_empty()
            && !settings.symbol_filter.iter().any(|s| s == &position.symbol)
        {
            return Some("symbol not in filter");
        }
        if position.volume <= Decimal::ZERO {
            return Some("non-positive volume");
        }
        if !settings.allow_positions_without_stop_levels && !position.has_stop_levels() {
            return Some("no stop levels set");
        }
        None
    }

    async fn process_new(&mut self, source: &PositionSnapshot, report: &mut CycleReport) {
        for ticket in self.ledger.untracked(source) {
            if self.stop_requested() {
                return;
            }
            let Some(position) = source.get(ticket) else {
                continue;
            };
            if let Some(reason) = self.filter(position) {
                debug!(
                    pair = %self.pair.id,
                    source_ticket = ticket,
                    symbol = %position.symbol,
                    reason,
                    "skipping source position"
                );
                report.skipped += 1;
                continue;
            }
            match self.copy_position(position).await {
                Ok(target_ticket) => {
                    report.copied += 1;
                    info!(
                        pair = %self.pair.id,
                        source_ticket = ticket,
                        target_ticket,
                        symbol = %position.symbol,
                        "position copied"
                    );
                }
                Err(SyncError::ConfirmationTimeout { .. }) => {
                    report.failures += 1;
                    error!(
                        pair = %self.pair.id,
                        source_ticket = ticket,
                        symbol = %position.symbol,
                        "open accepted but no fill observed in the confirmation window; \
                         requires manual reconciliation, will retry next cycle"
                    );
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(
                        pair = %self.pair.id,
                        source_ticket = ticket,
                        error = %e,
                        "copy failed, will retry next cycle"
                    );
                }
            }
        }
    }

    /// Mirror one source position onto the target account.
    ///
    /// The target ticket is not returned by the venue; it is discovered by
    /// polling the target's positions for a ticket absent from the
    /// pre-submission snapshot. The ledger entry is created only on a
    /// confirmed ticket, which makes entry creation exactly-once.
    async fn copy_position(&mut self, position: &Position) -> Result<Ticket, SyncError> {
        let settings = &self.pair.settings;
        let volume = (position.volume * settings.volume_multiplier).round_dp(2);

        let quote = with_retry(self.retry, || {
            self.gateway.quote(&self.pair.target, &position.symbol)
        })
        .await?;

        let before = self
            .gateway
            .list_positions(&self.pair.target, Some(&position.symbol))
            .await?;

        let tag = CopyTag::new(&self.pair.id, position.ticket);
        let spec = OrderSpec::new(
            &position.symbol,
            position.side,
            volume,
            quote.entry_price(position.side),
            settings.max_deviation,
            tag.to_string(),
        )
        .with_stops(position.stop_loss, position.take_profit);

        debug!(
            pair = %self.pair.id,
            request = %spec.request_id,
            source_ticket = position.ticket,
            volume = %volume,
            price = %spec.price,
            "submitting copy order"
        );
        with_retry(self.retry, || {
            self.gateway.submit_open(&self.pair.target, &spec)
        })
        .await?;

        let target_ticket = self.await_fill(position, &before).await?;
        self.ledger.track(
            position.ticket,
            CopyLink::new(target_ticket, position.stop_loss, position.take_profit),
        );
        Ok(target_ticket)
    }

    /// Bounded-retry search for the ticket created by an accepted open.
    async fn await_fill(
        &self,
        position: &Position,
        before: &PositionSnapshot,
    ) -> Result<Ticket, SyncError> {
        let settings = &self.pair.settings;
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(settings.confirm_timeout_ms);

        loop {
            match self
                .gateway
                .list_positions(&self.pair.target, Some(&position.symbol))
                .await
            {
                Ok(now) => {
                    let fill = now.iter().find(|p| {
                        !before.contains(p.ticket) && !self.ledger.is_target_tracked(p.ticket)
                    });
                    if let Some(fill) = fill {
                        return Ok(fill.ticket);
                    }
                }
                // Transient listing failures keep the search alive until
                // the deadline.
                Err(e) => debug!(pair = %self.pair.id, error = %e, "fill poll failed"),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(SyncError::ConfirmationTimeout {
                    source_ticket: position.ticket,
                    symbol: position.symbol.clone(),
                });
            }
            tokio::time::sleep(Duration::from_millis(settings.confirm_poll_ms)).await;
        }
    }

    async fn process_closed(
        &mut self,
        source: &PositionSnapshot,
        target: &PositionSnapshot,
        report: &mut CycleReport,
    ) {
        for source_ticket in self.ledger.closed_tickets(source) {
            if self.stop_requested() {
                return;
            }
            let Some(link) = self.ledger.get(source_ticket) else {
                continue;
            };
            let target_ticket = link.target_ticket;

            match target.get(target_ticket) {
                None => {
                    // Already flat, closed by other means.
                    info!(
                        pair = %self.pair.id,
                        source_ticket,
                        target_ticket,
                        "target already closed, dropping ledger entry"
                    );
                    self.ledger.untrack(source_ticket);
                    report.closed += 1;
                }
                Some(live) => match self.close_position(live).await {
                    Ok(()) => {
                        self.ledger.untrack(source_ticket);
                        report.closed += 1;
                        info!(
                            pair = %self.pair.id,
                            source_ticket,
                            target_ticket,
                            "position closed"
                        );
                    }
                    Err(e) => {
                        report.failures += 1;
                        warn!(
                            pair = %self.pair.id,
                            target_ticket,
                            error = %e,
                            "close failed, will retry next cycle"
                        );
                    }
                },
            }
        }
    }

    /// Close one live target position at the current market price. Uses the
    /// live symbol/volume/side, not the ledger's cached copy: the position
    /// may have drifted since it was opened.
    async fn close_position(&self, live: &Position) -> Result<(), SyncError> {
        let quote = with_retry(self.retry, || {
            self.gateway.quote(&self.pair.target, &live.symbol)
        })
        .await?;

        let spec = OrderSpec::new(
            &live.symbol,
            live.side.opposite(),
            live.volume,
            quote.exit_price(live.side),
            self.pair.settings.max_deviation,
            format!("CLOSE:{}", self.pair.id),
        );

        with_retry(self.retry, || {
            self.gateway.submit_close(&self.pair.target, live.ticket, &spec)
        })
        .await?;
        Ok(())
    }

    async fn process_modifications(
        &mut self,
        source: &PositionSnapshot,
        target: &PositionSnapshot,
        report: &mut CycleReport,
    ) {
        // Collect first: propagation updates the ledger on success.
        let tracked: Vec<(Ticket, Ticket, Decimal, Decimal)> = self
            .ledger
            .iter()
            .map(|(src, link)| (*src, link.target_ticket, link.stop_loss, link.take_profit))
            .collect();

        for (source_ticket, target_ticket, known_sl, known_tp) in tracked {
            if self.stop_requested() {
                return;
            }
            let Some(src_pos) = source.get(source_ticket) else {
                continue;
            };
            if src_pos.stop_loss == known_sl && src_pos.take_profit == known_tp {
                continue;
            }
            if !target.contains(target_ticket) {
                // Expected race: closed manually or slipped outside copy
                // control. Not a fault; re-checked next cycle.
                debug!(
                    pair = %self.pair.id,
                    target_ticket,
                    "target missing from snapshot, deferring stop sync"
                );
                continue;
            }

            let result = with_retry(self.retry, || {
                self.gateway.modify_stops(
                    &self.pair.target,
                    target_ticket,
                    src_pos.stop_loss,
                    src_pos.take_profit,
                )
            })
            .await;

            match result {
                Ok(()) => {
                    self.ledger
                        .update_stops(source_ticket, src_pos.stop_loss, src_pos.take_profit);
                    report.modified += 1;
                    info!(
                        pair = %self.pair.id,
                        source_ticket,
                        target_ticket,
                        stop_loss = %src_pos.stop_loss,
                        take_profit = %src_pos.take_profit,
                        "stop levels propagated"
                    );
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(
                        pair = %self.pair.id,
                        target_ticket,
                        error = %e,
                        "stop sync failed, will retry next cycle"
                    );
                }
            }
        }
    }
}
