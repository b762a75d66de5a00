use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fabline_catalog::ProductType;
use fabline_core::{Entity, EventId, LocationId, MovementId, OrderId, ProductId, StockPositionId};

/// Direction/purpose of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Stock consumed to satisfy an order requirement.
    Debit,
    /// Produced units routed into stock.
    Credit,
    /// Consumables used while packaging an order.
    PackagingConsumption,
}

/// Append-only stock ledger entry.
///
/// Movements are never rewritten; corrections are new movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub kind: MovementKind,
    pub product_id: ProductId,
    #[serde(default)]
    pub product_type: Option<ProductType>,
    #[serde(default)]
    pub position_id: Option<StockPositionId>,
    #[serde(default)]
    pub location_id: Option<LocationId>,
    pub quantity: u64,
    #[serde(default)]
    pub order_id: Option<OrderId>,
    /// Production event that caused this movement.
    pub event_id: EventId,
    pub occurred_at: DateTime<Utc>,
}

impl StockMovement {
    /// Debit of a physical position (stock used in place of production).
    #[allow(clippy::too_many_arguments)]
    pub fn debit(
        position_id: StockPositionId,
        location_id: LocationId,
        product_id: ProductId,
        product_type: ProductType,
        quantity: u64,
        order_id: OrderId,
        event_id: EventId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MovementId::new(),
            kind: MovementKind::Debit,
            product_id,
            product_type: Some(product_type),
            position_id: Some(position_id),
            location_id: Some(location_id),
            quantity,
            order_id: Some(order_id),
            event_id,
            occurred_at,
        }
    }

    /// Credit of produced units into a warehouse location.
    pub fn credit(
        location_id: Option<LocationId>,
        product_id: ProductId,
        product_type: ProductType,
        quantity: u64,
        order_id: Option<OrderId>,
        event_id: EventId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MovementId::new(),
            kind: MovementKind::Credit,
            product_id,
            product_type: Some(product_type),
            position_id: None,
            location_id,
            quantity,
            order_id,
            event_id,
            occurred_at,
        }
    }

    /// Consumable used while packaging an order.
    pub fn packaging_consumption(
        supply_id: ProductId,
        quantity: u64,
        order_id: OrderId,
        event_id: EventId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MovementId::new(),
            kind: MovementKind::PackagingConsumption,
            product_id: supply_id,
            product_type: None,
            position_id: None,
            location_id: None,
            quantity,
            order_id: Some(order_id),
            event_id,
            occurred_at,
        }
    }

    /// Signed effect on on-hand stock.
    pub fn delta(&self) -> i64 {
        let q = i64::try_from(self.quantity).unwrap_or(i64::MAX);
        match self.kind {
            MovementKind::Credit => q,
            MovementKind::Debit | MovementKind::PackagingConsumption => -q,
        }
    }
}

impl Entity for StockMovement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
