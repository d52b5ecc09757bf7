//! The copy ledger: which source tickets are mirrored by which target
//! tickets, and the stop levels last propagated for each.

use std::collections::HashMap;
use std::fmt;

use rust_decimal::Decimal;

use crate::models::{PositionSnapshot, Ticket};

/// One ledger entry: the mirrored target ticket plus the stop levels last
/// confirmed on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyLink {
    pub target_ticket: Ticket,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

impl CopyLink {
    pub fn new(target_ticket: Ticket, stop_loss: Decimal, take_profit: Decimal) -> Self {
        Self {
            target_ticket,
            stop_loss,
            take_profit,
        }
    }
}

/// Source-ticket -> [`CopyLink`] map, exclusively owned by one
/// reconciliation engine. Entries are created exactly once per source
/// ticket and removed only on confirmed close.
#[derive(Debug, Default)]
pub struct Ledger {
    links: HashMap<Ticket, CopyLink>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a link. Returns false (and leaves the ledger untouched) when
    /// the source ticket is already tracked.
    pub fn track(&mut self, source_ticket: Ticket, link: CopyLink) -> bool {
        if self.links.contains_key(&source_ticket) {
            return false;
        }
        self.links.insert(source_ticket, link);
        true
    }

    pub fn untrack(&mut self, source_ticket: Ticket) -> Option<CopyLink> {
        self.links.remove(&source_ticket)
    }

    pub fn get(&self, source_ticket: Ticket) -> Option<&CopyLink> {
        self.links.get(&source_ticket)
    }

    pub fn contains(&self, source_ticket: Ticket) -> bool {
        self.links.contains_key(&source_ticket)
    }

    /// True when `target_ticket` is the target side of any link.
    pub fn is_target_tracked(&self, target_ticket: Ticket) -> bool {
        self.links.values().any(|l| l.target_ticket == target_ticket)
    }

    /// Record stop levels as confirmed on the target.
    pub fn update_stops(&mut self, source_ticket: Ticket, stop_loss: Decimal, take_profit: Decimal) {
        if let Some(link) = self.links.get_mut(&source_ticket) {
            link.stop_loss = stop_loss;
            link.take_profit = take_profit;
        }
    }

    /// Source tickets present in `snapshot` but not yet tracked.
    pub fn untracked(&self, snapshot: &PositionSnapshot) -> Vec<Ticket> {
        snapshot.tickets().filter(|t| !self.contains(*t)).collect()
    }

    /// Tracked source tickets no longer present in `snapshot`.
    pub fn closed_tickets(&self, snapshot: &PositionSnapshot) -> Vec<Ticket> {
        self.links
            .keys()
            .copied()
            .filter(|t| !snapshot.contains(*t))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Ticket, &CopyLink)> {
        self.links.iter()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Tag stored in the venue order comment of every copied position:
/// `CPY:<pair>:<source_ticket>`. Lets a restarted worker re-associate its
/// target positions with their source tickets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTag {
    pub pair_id: String,
    pub source_ticket: Ticket,
}

impl CopyTag {
    pub fn new(pair_id: impl Into<String>, source_ticket: Ticket) -> Self {
        Self {
            pair_id: pair_id.into(),
            source_ticket,
        }
    }

    pub fn parse(comment: &str) -> Option<Self> {
        let rest = comment.strip_prefix("CPY:")?;
        let (pair_id, ticket) = rest.rsplit_once(':')?;
        if pair_id.is_empty() {
            return None;
        }
        Some(Self {
            pair_id: pair_id.to_string(),
            source_ticket: ticket.parse().ok()?,
        })
    }
}

impl fmt::Display for CopyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPY:{}:{}", self.pair_id, self.source_ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Position, Side};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn snapshot(tickets: &[Ticket]) -> PositionSnapshot {
        PositionSnapshot::new(
            tickets
                .iter()
                .map(|&ticket| Position {
                    ticket,
                    symbol: "EURUSD".to_string(),
                    side: Side::Long,
                    volume: dec!(1.0),
                    open_price: dec!(1.1),
                    stop_loss: dec!(0),
                    take_profit: dec!(0),
                    comment: String::new(),
                    opened_at: Utc::now(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_track_is_exactly_once() {
        let mut ledger = Ledger::new();

        assert!(ledger.track(1001, CopyLink::new(5001, dec!(0), dec!(0))));
        assert!(!ledger.track(1001, CopyLink::new(5002, dec!(0), dec!(0))));
        assert_eq!(ledger.get(1001).unwrap().target_ticket, 5001);
    }

    #[test]
    fn test_diffs_against_snapshot() {
        let mut ledger = Ledger::new();
        ledger.track(1001, CopyLink::new(5001, dec!(0), dec!(0)));
        ledger.track(1002, CopyLink::new(5002, dec!(0), dec!(0)));

        let source = snapshot(&[1001, 1003]);

        assert_eq!(ledger.untracked(&source), vec![1003]);
        assert_eq!(ledger.closed_tickets(&source), vec![1002]);
    }

    #[test]
    fn test_target_tracking_lookup() {
        let mut ledger = Ledger::new();
        ledger.track(1001, CopyLink::new(5001, dec!(0), dec!(0)));

        assert!(ledger.is_target_tracked(5001));
        assert!(!ledger.is_target_tracked(5002));
    }

    #[test]
    fn test_copy_tag_round_trip() {
        let tag = CopyTag::new("pair-1", 1001);
        assert_eq!(tag.to_string(), "CPY:pair-1:1001");
        assert_eq!(CopyTag::parse("CPY:pair-1:1001"), Some(tag));
    }

    #[test]
    fn test_copy_tag_rejects_foreign_comments() {
        assert_eq!(CopyTag::parse(""), None);
        assert_eq!(CopyTag::parse("manual entry"), None);
        assert_eq!(CopyTag::parse("CPY:pair-1:not-a-ticket"), None);
        assert_eq!(CopyTag::parse("CPY::1001"), None);
    }

    #[test]
    fn test_copy_tag_with_colon_in_pair_id() {
        let parsed = CopyTag::parse("CPY:eu:live:1001").unwrap();
        assert_eq!(parsed.pair_id, "eu:live");
        assert_eq!(parsed.source_ticket, 1001);
    }
}
