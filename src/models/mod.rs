//! Data models shared across the application.

pub mod order;
pub mod position;

pub use order::{OrderSpec, Quote};
pub use position::{Position, PositionSnapshot, Side, Ticket};
