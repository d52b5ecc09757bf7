//! In-memory simulated venue.
//!
//! The shipped backend for paper runs and the test double for everything
//! else; real venue connectors implement [`VenueTransport`] in terms of the
//! same interface. Accepted open orders are queued and only become visible
//! positions on a later `positions` call, preserving the accepted-but-not-
//! yet-queryable behavior of a real venue.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::config::AccountConfig;
use crate::error::VenueError;
use crate::models::{OrderSpec, Position, Quote, Side, Ticket};

use super::session::{SessionId, VenueTransport};

/// Call counters for assertions and paper-run summaries.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimStats {
    pub connects: u32,
    pub opens_submitted: u32,
    pub closes_submitted: u32,
    pub modifies_submitted: u32,
}

#[derive(Debug)]
struct PendingFill {
    account: String,
    spec: OrderSpec,
    polls_remaining: u32,
}

#[derive(Debug, Default)]
struct AccountState {
    positions: HashMap<Ticket, Position>,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, AccountState>,
    quotes: HashMap<String, Quote>,
    sessions: HashMap<SessionId, String>,
    pending: Vec<PendingFill>,
    next_ticket: Ticket,
    next_session: SessionId,
    // Fault injection: each counter fails/rejects that many upcoming calls.
    connect_failures: u32,
    query_failures: u32,
    open_rejections: u32,
    close_rejections: u32,
    modify_rejections: u32,
    fill_delay_polls: u32,
    stats: SimStats,
}

/// Simulated multi-account venue.
pub struct SimVenue {
    inner: Mutex<Inner>,
}

impl SimVenue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_ticket: 5000,
                ..Inner::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("sim venue state")
    }

    /// Publish a quote for `symbol`, shared by all accounts.
    pub fn set_quote(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        self.state().quotes.insert(symbol.to_string(), Quote { bid, ask });
    }

    /// Place an already-open position on an account, as if a trader opened
    /// it outside of copy control. Returns its ticket.
    #[allow(clippy::too_many_arguments)]
    pub fn seed_position(
        &self,
        account: &str,
        ticket: Ticket,
        symbol: &str,
        side: Side,
        volume: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> Ticket {
        let mut inner = self.state();
        let open_price = inner
            .quotes
            .get(symbol)
            .map(|q| q.entry_price(side))
            .unwrap_or(Decimal::ZERO);
        inner.accounts.entry(account.to_string()).or_default().positions.insert(
            ticket,
            Position {
                ticket,
                symbol: symbol.to_string(),
                side,
                volume,
                open_price,
                stop_loss,
                take_profit,
                comment: String::new(),
                opened_at: Utc::now(),
            },
        );
        ticket
    }

    /// Remove a position, as if closed outside of copy control.
    pub fn remove_position(&self, account: &str, ticket: Ticket) {
        if let Some(state) = self.state().accounts.get_mut(account) {
            state.positions.remove(&ticket);
        }
    }

    /// Change a position's stop levels in place.
    pub fn set_stops(&self, account: &str, ticket: Ticket, stop_loss: Decimal, take_profit: Decimal) {
        if let Some(pos) = self
            .state()
            .accounts
            .get_mut(account)
            .and_then(|s| s.positions.get_mut(&ticket))
        {
            pos.stop_loss = stop_loss;
            pos.take_profit = take_profit;
        }
    }

    pub fn position(&self, account: &str, ticket: Ticket) -> Option<Position> {
        self.state()
            .accounts
            .get(account)
            .and_then(|s| s.positions.get(&ticket).cloned())
    }

    pub fn open_positions(&self, account: &str) -> Vec<Position> {
        self.state()
            .accounts
            .get(account)
            .map(|s| s.positions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> SimStats {
        self.state().stats
    }

    /// Fail the next `n` connect attempts.
    pub fn fail_connects(&self, n: u32) {
        self.state().connect_failures = n;
    }

    /// Fail the next `n` position/quote queries.
    pub fn fail_queries(&self, n: u32) {
        self.state().query_failures = n;
    }

    /// Reject the next `n` open orders.
    pub fn reject_opens(&self, n: u32) {
        self.state().open_rejections = n;
    }

    /// Reject the next `n` close orders.
    pub fn reject_closes(&self, n: u32) {
        self.state().close_rejections = n;
    }

    /// Reject the next `n` stop-modify orders.
    pub fn reject_modifies(&self, n: u32) {
        self.state().modify_rejections = n;
    }

    /// Delay fills: accepted opens become visible positions only after
    /// `polls` further `positions` calls on the traded account.
    pub fn delay_fills(&self, polls: u32) {
        self.state().fill_delay_polls = polls;
    }
}

impl Default for SimVenue {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn account_of(&self, session: SessionId) -> Result<String, VenueError> {
        self.sessions
            .get(&session)
            .cloned()
            .ok_or_else(|| VenueError::QueryFailed(format!("unknown session {session}")))
    }

    /// Materialize pending fills for `account` that have aged through their
    /// visibility delay; decrement the rest.
    fn settle_pending(&mut self, account: &str) {
        let mut kept = Vec::with_capacity(self.pending.len());
        let mut matured = Vec::new();
        for mut fill in self.pending.drain(..) {
            if fill.account != account {
                kept.push(fill);
            } else if fill.polls_remaining == 0 {
                matured.push(fill.spec);
            } else {
                fill.polls_remaining -= 1;
                kept.push(fill);
            }
        }
        self.pending = kept;
        for spec in matured {
            self.next_ticket += 1;
            let ticket = self.next_ticket;
            self.accounts.entry(account.to_string()).or_default().positions.insert(
                ticket,
                Position {
                    ticket,
                    symbol: spec.symbol.clone(),
                    side: spec.side,
                    volume: spec.volume,
                    open_price: spec.price,
                    stop_loss: spec.stop_loss,
                    take_profit: spec.take_profit,
                    comment: spec.comment.clone(),
                    opened_at: Utc::now(),
                },
            );
        }
    }
}

#[async_trait]
impl VenueTransport for SimVenue {
    async fn connect(&self, account: &AccountConfig) -> Result<SessionId, VenueError> {
        let mut inner = self.state();
        if inner.connect_failures > 0 {
            inner.connect_failures -= 1;
            return Err(VenueError::ConnectFailed {
                account: account.key(),
                reason: "simulated connect failure".to_string(),
            });
        }
        inner.next_session += 1;
        let session = inner.next_session;
        inner.sessions.insert(session, account.key());
        inner.accounts.entry(account.key()).or_default();
        inner.stats.connects += 1;
        Ok(session)
    }

    async fn disconnect(&self, session: SessionId) {
        self.state().sessions.remove(&session);
    }

    async fn positions(
        &self,
        session: SessionId,
        symbol: Option<&str>,
    ) -> Result<Vec<Position>, VenueError> {
        let mut inner = self.state();
        let account = inner.account_of(session)?;
        if inner.query_failures > 0 {
            inner.query_failures -= 1;
            return Err(VenueError::QueryFailed("simulated query failure".to_string()));
        }
        inner.settle_pending(&account);
        let positions = inner
            .accounts
            .get(&account)
            .map(|s| {
                s.positions
                    .values()
                    .filter(|p| symbol.map_or(true, |sym| p.symbol == sym))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(positions)
    }

    async fn tick(&self, session: SessionId, symbol: &str) -> Result<Quote, VenueError> {
        let mut inner = self.state();
        inner.account_of(session)?;
        if inner.query_failures > 0 {
            inner.query_failures -= 1;
            return Err(VenueError::QueryFailed("simulated query failure".to_string()));
        }
        inner
            .quotes
            .get(symbol)
            .copied()
            .ok_or_else(|| VenueError::QueryFailed(format!("no quote for {symbol}")))
    }

    async fn order_open(&self, session: SessionId, spec: &OrderSpec) -> Result<(), VenueError> {
        let mut inner = self.state();
        let account = inner.account_of(session)?;
        if inner.open_rejections > 0 {
            inner.open_rejections -= 1;
            return Err(VenueError::OrderRejected("simulated open rejection".to_string()));
        }
        inner.stats.opens_submitted += 1;
        let polls_remaining = inner.fill_delay_polls;
        inner.pending.push(PendingFill {
            account,
            spec: spec.clone(),
            polls_remaining,
        });
        Ok(())
    }

    async fn order_close(
        &self,
        session: SessionId,
        ticket: Ticket,
        _spec: &OrderSpec,
    ) -> Result<(), VenueError> {
        let mut inner = self.state();
        let account = inner.account_of(session)?;
        if inner.close_rejections > 0 {
            inner.close_rejections -= 1;
            return Err(VenueError::OrderRejected("simulated close rejection".to_string()));
        }
        let removed = inner
            .accounts
            .get_mut(&account)
            .and_then(|s| s.positions.remove(&ticket));
        if removed.is_none() {
            return Err(VenueError::OrderRejected(format!("unknown ticket {ticket}")));
        }
        inner.stats.closes_submitted += 1;
        Ok(())
    }

    async fn order_modify(
        &self,
        session: SessionId,
        ticket: Ticket,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> Result<(), VenueError> {
        let mut inner = self.state();
        let account = inner.account_of(session)?;
        if inner.modify_rejections > 0 {
            inner.modify_rejections -= 1;
            return Err(VenueError::OrderRejected("simulated modify rejection".to_string()));
        }
        let position = inner
            .accounts
            .get_mut(&account)
            .and_then(|s| s.positions.get_mut(&ticket));
        match position {
            Some(pos) => {
                pos.stop_loss = stop_loss;
                pos.take_profit = take_profit;
                inner.stats.modifies_submitted += 1;
                Ok(())
            }
            None => Err(VenueError::OrderRejected(format!("unknown ticket {ticket}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn account(login: u64) -> AccountConfig {
        AccountConfig {
            login,
            server: "Test-Server".to_string(),
            password: String::new(),
            password_env: None,
        }
    }

    #[tokio::test]
    async fn test_accepted_open_is_not_immediately_queryable() {
        let venue = SimVenue::new();
        venue.set_quote("EURUSD", dec!(1.1000), dec!(1.1002));
        let session = venue.connect(&account(1)).await.unwrap();

        let spec = OrderSpec::new("EURUSD", Side::Long, dec!(0.5), dec!(1.1002), 5, "tag");
        venue.order_open(session, &spec).await.unwrap();

        // Order accepted, but the position only materializes on a poll.
        assert!(venue.open_positions(&account(1).key()).is_empty());
        let seen = venue.positions(session, None).await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].comment, "tag");
    }

    #[tokio::test]
    async fn test_fill_delay_defers_visibility() {
        let venue = SimVenue::new();
        venue.set_quote("EURUSD", dec!(1.1000), dec!(1.1002));
        venue.delay_fills(2);
        let session = venue.connect(&account(1)).await.unwrap();

        let spec = OrderSpec::new("EURUSD", Side::Long, dec!(1.0), dec!(1.1002), 5, "");
        venue.order_open(session, &spec).await.unwrap();

        assert!(venue.positions(session, None).await.unwrap().is_empty());
        assert!(venue.positions(session, None).await.unwrap().is_empty());
        assert_eq!(venue.positions(session, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_of_unknown_ticket_is_rejected() {
        let venue = SimVenue::new();
        let session = venue.connect(&account(1)).await.unwrap();

        let spec = OrderSpec::new("EURUSD", Side::Short, dec!(1.0), dec!(1.1), 5, "");
        let err = venue.order_close(session, 42, &spec).await.unwrap_err();
        assert!(matches!(err, VenueError::OrderRejected(_)));
    }
}
