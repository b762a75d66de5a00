//! Inventory module: physical stock positions and the stock-movement ledger.
//!
//! Stock positions are owned by the warehouse (read-only here). The fulfillment
//! core only appends movements: debits when stock substitutes for production,
//! credits when surplus production is routed into stock, and packaging
//! consumption when an order is closed.

pub mod movement;
pub mod position;

pub use movement::{MovementKind, StockMovement};
pub use position::StockPosition;
