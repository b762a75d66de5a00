//! `fabline-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by every fulfillment
//! crate (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod lifecycle;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    AssemblyGroupId, BatchId, EventId, LocationId, MovementId, OrderId, ProductId,
    StockPositionId,
};
pub use lifecycle::{ExpectedVersion, Lifecycle, Transition};
