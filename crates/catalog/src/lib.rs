//! Product catalog module (read-only from the fulfillment core's perspective).
//!
//! Holds the hierarchical product model (kit → model → piece → part), the
//! print-job specifications pieces are manufactured from, and the catalog
//! documents reconciliation resolves consumed stock against.

pub mod product;

pub use product::{
    ComponentRef, ItemQuantity, PieceKind, PrintJob, Product, ProductNode, ProductType,
};
