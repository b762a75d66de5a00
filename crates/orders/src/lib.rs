//! Customer order documents.
//!
//! Orders are created by the UI layer on submission and afterwards only have
//! their status moved forward by workflow handlers; they are never deleted.

pub mod order;

pub use order::{Order, OrderStatus};
