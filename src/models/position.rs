//! Position model and per-account position snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Venue-issued unique identifier for one open position on one account.
/// Never reused while the position is open.
pub type Ticket = u64;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The side that closes a position on this side.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

/// One open position as reported by the venue.
///
/// Identity is the `ticket`. Only `stop_loss` and `take_profit` change while
/// the ticket is open; symbol, side, and volume are fixed at open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: Ticket,

    /// Instrument identifier, e.g. "EURUSD".
    pub symbol: String,

    pub side: Side,

    /// Lot size, positive.
    pub volume: Decimal,

    /// Fill price at open.
    pub open_price: Decimal,

    /// Stop-loss price; zero means unset.
    pub stop_loss: Decimal,

    /// Take-profit price; zero means unset.
    pub take_profit: Decimal,

    /// Venue-stored order comment. Carries the copy tag for positions this
    /// system opened.
    #[serde(default)]
    pub comment: String,

    #[serde(default = "Utc::now")]
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// True when at least one stop level is set.
    pub fn has_stop_levels(&self) -> bool {
        !self.stop_loss.is_zero() || !self.take_profit.is_zero()
    }
}

/// Point-in-time mapping from ticket to position for one account.
///
/// Fetched fresh every cycle; has no identity across cycles beyond its
/// tickets.
#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    pub taken_at: DateTime<Utc>,
    positions: HashMap<Ticket, Position>,
}

impl PositionSnapshot {
    pub fn new(positions: Vec<Position>) -> Self {
        Self {
            taken_at: Utc::now(),
            positions: positions.into_iter().map(|p| (p.ticket, p)).collect(),
        }
    }

    pub fn get(&self, ticket: Ticket) -> Option<&Position> {
        self.positions.get(&ticket)
    }

    pub fn contains(&self, ticket: Ticket) -> bool {
        self.positions.contains_key(&ticket)
    }

    pub fn tickets(&self) -> impl Iterator<Item = Ticket> + '_ {
        self.positions.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
