use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fabline_catalog::ProductNode;
use fabline_core::{DomainError, DomainResult, Entity, Lifecycle, OrderId, Transition};

/// Order status lifecycle (forward-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename = "recebido")]
    Received,
    #[serde(rename = "em_producao")]
    InProduction,
    #[serde(rename = "aguardando_embalagem")]
    AwaitingPackaging,
    #[serde(rename = "concluido")]
    Completed,
}

impl Lifecycle for OrderStatus {
    fn rank(self) -> u8 {
        match self {
            OrderStatus::Received => 0,
            OrderStatus::InProduction => 1,
            OrderStatus::AwaitingPackaging => 2,
            OrderStatus::Completed => 3,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed)
    }
}

/// Customer order document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Human-facing order number.
    pub number: u64,
    pub status: OrderStatus,
    /// Snapshot of the ordered top-level products, including nested components.
    pub products: Vec<ProductNode>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(id: OrderId, number: u64, products: Vec<ProductNode>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            number,
            status: OrderStatus::Received,
            products,
            created_at,
            updated_at: None,
            completed_at: None,
        }
    }

    pub fn is_received(&self) -> bool {
        self.status == OrderStatus::Received
    }

    /// Check the product snapshot is complete enough to explode.
    pub fn validate_for_explosion(&self) -> DomainResult<()> {
        if self.products.is_empty() {
            return Err(DomainError::validation(format!("order {} has no products", self.id)));
        }
        for product in &self.products {
            product.validate()?;
        }
        Ok(())
    }

    /// Move the status forward; a stale or repeated request leaves it unchanged.
    pub fn advance(&mut self, next: OrderStatus, at: DateTime<Utc>) -> Transition<OrderStatus> {
        let transition = self.status.advance(next);
        if transition.is_applied() {
            self.updated_at = Some(at);
            if next == OrderStatus::Completed {
                self.completed_at = Some(at);
            }
        }
        transition
    }
}

impl Entity for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
