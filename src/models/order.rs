//! Order specifications and quotes submitted to a venue gateway.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::position::Side;

/// Best bid/ask for one symbol on one account's venue at one instant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
}

impl Quote {
    /// Price used to enter a position: ask for longs, bid for shorts.
    pub fn entry_price(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.ask,
            Side::Short => self.bid,
        }
    }

    /// Price used to close a position: bid for longs, ask for shorts.
    pub fn exit_price(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.bid,
            Side::Short => self.ask,
        }
    }
}

/// A market order request against one account.
///
/// `request_id` correlates submission, retries, and fill discovery in the
/// logs; it is never sent to the venue as an identifier.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub request_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,

    /// Maximum accepted slippage, in points.
    pub deviation: u32,

    /// Venue-stored comment; carries the copy tag.
    pub comment: String,

    pub created_at: DateTime<Utc>,
}

impl OrderSpec {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        volume: Decimal,
        price: Decimal,
        deviation: u32,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            volume,
            price,
            stop_loss: Decimal::ZERO,
            take_profit: Decimal::ZERO,
            deviation,
            comment: comment.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_stops(mut self, stop_loss: Decimal, take_profit: Decimal) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_spec_builder() {
        let spec = OrderSpec::new("EURUSD", Side::Long, dec!(1.0), dec!(1.1002), 5, "CPY:pair-1:1001")
            .with_stops(dec!(1.05), dec!(1.20));

        assert_eq!(spec.symbol, "EURUSD");
        assert_eq!(spec.deviation, 5);
        assert_eq!(spec.stop_loss, dec!(1.05));
        assert_eq!(spec.take_profit, dec!(1.20));
        assert!(spec.created_at <= Utc::now());
    }

    #[test]
    fn test_quote_prices() {
        let quote = Quote {
            bid: dec!(1.1000),
            ask: dec!(1.1002),
        };

        assert_eq!(quote.entry_price(Side::Long), dec!(1.1002));
        assert_eq!(quote.entry_price(Side::Short), dec!(1.1000));
        assert_eq!(quote.exit_price(Side::Long), dec!(1.1000));
        assert_eq!(quote.exit_price(Side::Short), dec!(1.1002));
    }
}
