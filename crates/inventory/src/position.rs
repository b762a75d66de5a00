use serde::{Deserialize, Serialize};

use fabline_catalog::ProductType;
use fabline_core::{DomainError, DomainResult, Entity, LocationId, ProductId, StockPositionId};

/// A physical stock position: one product held at one warehouse location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPosition {
    pub id: StockPositionId,
    pub product_id: ProductId,
    pub product_type: ProductType,
    pub location_id: LocationId,
    /// Units on hand.
    pub quantity: i64,
}

impl StockPosition {
    /// Check that `quantity` units of `product_id` may be debited from here.
    pub fn ensure_can_debit(&self, product_id: &ProductId, quantity: u64) -> DomainResult<()> {
        if &self.product_id != product_id {
            return Err(DomainError::validation(format!(
                "stock position {} holds {}, not {}",
                self.id, self.product_id, product_id
            )));
        }
        if quantity == 0 {
            return Err(DomainError::validation("debit quantity cannot be zero"));
        }
        let on_hand = u64::try_from(self.quantity).unwrap_or(0);
        if quantity > on_hand {
            return Err(DomainError::invariant(format!(
                "stock cannot go negative: position {} has {} units, {} requested",
                self.id, self.quantity, quantity
            )));
        }
        Ok(())
    }

    /// Take `quantity` units of `product_id` off the position.
    pub fn debit(&mut self, product_id: &ProductId, quantity: u64) -> DomainResult<()> {
        self.ensure_can_debit(product_id, quantity)?;
        let taken = i64::try_from(quantity)
            .map_err(|_| DomainError::validation(format!("debit of {quantity} units is out of range")))?;
        self.quantity -= taken;
        Ok(())
    }
}

impl Entity for StockPosition {
    type Id = StockPositionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
