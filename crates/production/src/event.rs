//! Production events (the event log driving the workflow).
//!
//! Stored records keep the kind tag and the raw payload separately; a record
//! is parsed into a typed [`ProductionEvent`] only when its handler runs, so a
//! malformed payload surfaces as a validation error on that run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use fabline_catalog::{ItemQuantity, ProductType};
use fabline_core::{
    AssemblyGroupId, BatchId, DomainError, DomainResult, Entity, EventId, LocationId, OrderId,
    ProductId, StockPositionId,
};
use fabline_events::Event;

use crate::error::{WorkflowError, WorkflowResult};
use crate::identifier::AssemblyInstanceId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    pub order_id: OrderId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRef {
    pub batch_id: BatchId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartQuantity {
    pub part_id: ProductId,
    pub quantity: u32,
}

/// Printed parts arriving at a multi-print piece's assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartsArrival {
    pub order_id: OrderId,
    pub assembly_instance_id: AssemblyInstanceId,
    pub parts: Vec<PartQuantity>,
    #[serde(default)]
    pub batch_id: Option<BatchId>,
}

/// Where finished units go besides the order that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "destino")]
pub enum Destination {
    #[serde(rename = "estoque")]
    Stock {
        quantity: u32,
        #[serde(default)]
        location_id: Option<LocationId>,
    },
    #[serde(rename = "pedido")]
    Order { quantity: u32, order_id: OrderId },
}

impl Destination {
    pub fn quantity(&self) -> u32 {
        match self {
            Destination::Stock { quantity, .. } | Destination::Order { quantity, .. } => *quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyCompletion {
    pub assembly_group_id: AssemblyGroupId,
    #[serde(default)]
    pub destinations: Vec<Destination>,
}

/// A finished piece or model arriving at its parent's assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentArrival {
    pub order_id: OrderId,
    /// The model or kit instance being assembled.
    pub target_instance_id: AssemblyInstanceId,
    pub product_id: ProductId,
    pub product_type: ProductType,
    pub quantity: u32,
    #[serde(default)]
    pub component_instance_id: Option<AssemblyInstanceId>,
}

/// A finished top-level product arriving at the order's packaging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingArrival {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default)]
    pub assembly_instance_id: Option<AssemblyInstanceId>,
    #[serde(default)]
    pub source_group_id: Option<AssemblyGroupId>,
    #[serde(default)]
    pub destinations: Vec<Destination>,
}

/// Finished units routed into warehouse stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEntry {
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default)]
    pub location_id: Option<LocationId>,
    #[serde(default)]
    pub source_order_id: Option<OrderId>,
}

/// Finished units routed to another order's packaging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTransfer {
    pub source_order_id: OrderId,
    pub target_order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HierarchyLevel {
    #[serde(rename = "raiz")]
    Root,
    #[serde(rename = "aninhado")]
    Nested,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedProduct {
    pub product_id: ProductId,
    pub product_type: ProductType,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDebit {
    pub position_id: StockPositionId,
    pub quantity: u32,
}

/// Stock assigned to an order requirement in place of production.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUsage {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub product_type: ProductType,
    pub level: HierarchyLevel,
    pub quantity: u32,
    /// For nested usage: the model or kit the product sits under.
    #[serde(default)]
    pub parent_product_id: Option<ProductId>,
    /// Instances to satisfy; the first uncovered ones when empty.
    #[serde(default)]
    pub assembly_instance_ids: Vec<AssemblyInstanceId>,
    /// Sub-products the consumed stock contains.
    #[serde(default)]
    pub nested_products: Vec<NestedProduct>,
    pub stock_positions: Vec<StockDebit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompletion {
    pub order_id: OrderId,
    #[serde(default)]
    pub packaging_minutes: u64,
    #[serde(default)]
    pub consumables: Vec<ItemQuantity>,
}

/// Typed production event.
///
/// Serialized as `{"tipo": <kind>, "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tipo", content = "payload")]
pub enum ProductionEvent {
    #[serde(rename = "criacao_pedido")]
    OrderCreated(OrderRef),
    #[serde(rename = "inicio_producao")]
    ProductionStarted(BatchRef),
    #[serde(rename = "conclusao_producao")]
    ProductionCompleted(BatchRef),
    #[serde(rename = "entrada_parte_montagem_peca")]
    PartsIntoPieceAssembly(PartsArrival),
    #[serde(rename = "conclusao_montagem_peca")]
    PieceAssemblyCompleted(AssemblyCompletion),
    #[serde(rename = "entrada_peca_montagem_modelo")]
    PieceIntoModelAssembly(ComponentArrival),
    #[serde(rename = "conclusao_montagem_modelo")]
    ModelAssemblyCompleted(AssemblyCompletion),
    #[serde(rename = "entrada_modelo_montagem_kit")]
    ModelIntoKitAssembly(ComponentArrival),
    #[serde(rename = "entrada_peca_montagem_kit")]
    PieceIntoKitAssembly(ComponentArrival),
    #[serde(rename = "conclusao_montagem_kit")]
    KitAssemblyCompleted(AssemblyCompletion),
    #[serde(rename = "entrada_kit_embalagem")]
    KitIntoPackaging(PackagingArrival),
    #[serde(rename = "entrada_modelo_embalagem")]
    ModelIntoPackaging(PackagingArrival),
    #[serde(rename = "entrada_peca_embalagem")]
    PieceIntoPackaging(PackagingArrival),
    #[serde(rename = "entrada_estoque_kit")]
    KitIntoStock(StockEntry),
    #[serde(rename = "entrada_estoque_modelo")]
    ModelIntoStock(StockEntry),
    #[serde(rename = "entrada_estoque_peca")]
    PieceIntoStock(StockEntry),
    #[serde(rename = "entrada_pedido_kit")]
    KitIntoOrder(OrderTransfer),
    #[serde(rename = "entrada_pedido_modelo")]
    ModelIntoOrder(OrderTransfer),
    #[serde(rename = "entrada_pedido_peca")]
    PieceIntoOrder(OrderTransfer),
    #[serde(rename = "uso_estoque")]
    StockUsed(StockUsage),
    #[serde(rename = "conclusao_pedido")]
    OrderCompleted(OrderCompletion),
}

impl ProductionEvent {
    /// Packaging arrival event for a finished product of `product_type`.
    pub fn into_packaging(product_type: ProductType, arrival: PackagingArrival) -> Option<Self> {
        match product_type {
            ProductType::Kit => Some(Self::KitIntoPackaging(arrival)),
            ProductType::Model => Some(Self::ModelIntoPackaging(arrival)),
            ProductType::Piece => Some(Self::PieceIntoPackaging(arrival)),
            ProductType::Part => None,
        }
    }

    pub fn into_stock(product_type: ProductType, entry: StockEntry) -> Option<Self> {
        match product_type {
            ProductType::Kit => Some(Self::KitIntoStock(entry)),
            ProductType::Model => Some(Self::ModelIntoStock(entry)),
            ProductType::Piece => Some(Self::PieceIntoStock(entry)),
            ProductType::Part => None,
        }
    }

    pub fn into_order(product_type: ProductType, transfer: OrderTransfer) -> Option<Self> {
        match product_type {
            ProductType::Kit => Some(Self::KitIntoOrder(transfer)),
            ProductType::Model => Some(Self::ModelIntoOrder(transfer)),
            ProductType::Piece => Some(Self::PieceIntoOrder(transfer)),
            ProductType::Part => None,
        }
    }

    /// Reject payloads that parse but cannot be acted on.
    pub fn validate(&self) -> DomainResult<()> {
        fn positive(what: &str, quantity: u32) -> DomainResult<()> {
            if quantity == 0 {
                return Err(DomainError::validation(format!("{what} must be positive")));
            }
            Ok(())
        }
        fn present(what: &str, id: &ProductId) -> DomainResult<()> {
            if id.is_blank() {
                return Err(DomainError::validation(format!("{what} is required")));
            }
            Ok(())
        }
        fn destinations(list: &[Destination]) -> DomainResult<()> {
            list.iter()
                .try_for_each(|d| positive("destination quantity", d.quantity()))
        }

        match self {
            Self::OrderCreated(_) | Self::ProductionStarted(_) | Self::ProductionCompleted(_) => Ok(()),
            Self::PartsIntoPieceAssembly(p) => {
                if p.parts.is_empty() {
                    return Err(DomainError::validation("parts cannot be empty"));
                }
                p.parts.iter().try_for_each(|part| {
                    present("part_id", &part.part_id)?;
                    positive("part quantity", part.quantity)
                })
            }
            Self::PieceAssemblyCompleted(c)
            | Self::ModelAssemblyCompleted(c)
            | Self::KitAssemblyCompleted(c) => destinations(&c.destinations),
            Self::PieceIntoModelAssembly(a) | Self::ModelIntoKitAssembly(a) | Self::PieceIntoKitAssembly(a) => {
                present("product_id", &a.product_id)?;
                positive("quantity", a.quantity)
            }
            Self::KitIntoPackaging(a) | Self::ModelIntoPackaging(a) | Self::PieceIntoPackaging(a) => {
                present("product_id", &a.product_id)?;
                positive("quantity", a.quantity)?;
                destinations(&a.destinations)
            }
            Self::KitIntoStock(e) | Self::ModelIntoStock(e) | Self::PieceIntoStock(e) => {
                present("product_id", &e.product_id)?;
                positive("quantity", e.quantity)
            }
            Self::KitIntoOrder(t) | Self::ModelIntoOrder(t) | Self::PieceIntoOrder(t) => {
                present("product_id", &t.product_id)?;
                positive("quantity", t.quantity)
            }
            Self::StockUsed(u) => {
                present("product_id", &u.product_id)?;
                positive("quantity", u.quantity)?;
                if u.stock_positions.is_empty() {
                    return Err(DomainError::validation("stock_positions cannot be empty"));
                }
                for nested in &u.nested_products {
                    present("nested product_id", &nested.product_id)?;
                    positive("nested quantity", nested.quantity)?;
                }
                for debit in &u.stock_positions {
                    if debit.position_id.is_blank() {
                        return Err(DomainError::validation("position_id is required"));
                    }
                    positive("debit quantity", debit.quantity)?;
                }
                let debited: u64 = u.stock_positions.iter().map(|d| u64::from(d.quantity)).sum();
                if debited != u64::from(u.quantity) {
                    return Err(DomainError::validation(format!(
                        "stock debits total {debited}, expected {}",
                        u.quantity
                    )));
                }
                if let Some(parent) = &u.parent_product_id {
                    present("parent_product_id", parent)?;
                }
                Ok(())
            }
            Self::OrderCompleted(c) => c
                .consumables
                .iter()
                .try_for_each(|item| present("consumable id", &item.id)),
        }
    }
}

impl Event for ProductionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::OrderCreated(_) => "criacao_pedido",
            Self::ProductionStarted(_) => "inicio_producao",
            Self::ProductionCompleted(_) => "conclusao_producao",
            Self::PartsIntoPieceAssembly(_) => "entrada_parte_montagem_peca",
            Self::PieceAssemblyCompleted(_) => "conclusao_montagem_peca",
            Self::PieceIntoModelAssembly(_) => "entrada_peca_montagem_modelo",
            Self::ModelAssemblyCompleted(_) => "conclusao_montagem_modelo",
            Self::ModelIntoKitAssembly(_) => "entrada_modelo_montagem_kit",
            Self::PieceIntoKitAssembly(_) => "entrada_peca_montagem_kit",
            Self::KitAssemblyCompleted(_) => "conclusao_montagem_kit",
            Self::KitIntoPackaging(_) => "entrada_kit_embalagem",
            Self::ModelIntoPackaging(_) => "entrada_modelo_embalagem",
            Self::PieceIntoPackaging(_) => "entrada_peca_embalagem",
            Self::KitIntoStock(_) => "entrada_estoque_kit",
            Self::ModelIntoStock(_) => "entrada_estoque_modelo",
            Self::PieceIntoStock(_) => "entrada_estoque_peca",
            Self::KitIntoOrder(_) => "entrada_pedido_kit",
            Self::ModelIntoOrder(_) => "entrada_pedido_modelo",
            Self::PieceIntoOrder(_) => "entrada_pedido_peca",
            Self::StockUsed(_) => "uso_estoque",
            Self::OrderCompleted(_) => "conclusao_pedido",
        }
    }

    fn version(&self) -> u32 {
        1
    }
}

/// Event-log document.
///
/// Immutable once written, except for the `processed` marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionEventRecord {
    pub id: EventId,
    #[serde(rename = "tipo")]
    pub kind: String,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
    /// Event whose handler appended this one.
    #[serde(default)]
    pub caused_by: Option<EventId>,
    #[serde(default)]
    pub processed: bool,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl ProductionEventRecord {
    pub fn new(
        event: &ProductionEvent,
        caused_by: Option<EventId>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let mut tagged = serde_json::to_value(event)?;
        let payload = tagged
            .get_mut("payload")
            .map(JsonValue::take)
            .unwrap_or(JsonValue::Null);
        Ok(Self {
            id: EventId::new(),
            kind: event.event_type().to_string(),
            payload,
            created_at,
            caused_by,
            processed: false,
            processed_at: None,
        })
    }

    /// A record as an external collaborator would write it: kind + raw payload.
    pub fn raw(kind: impl Into<String>, payload: JsonValue, created_at: DateTime<Utc>) -> Self {
        Self {
            id: EventId::new(),
            kind: kind.into(),
            payload,
            created_at,
            caused_by: None,
            processed: false,
            processed_at: None,
        }
    }

    /// Parse and validate the payload for this record's kind.
    pub fn parse(&self) -> WorkflowResult<ProductionEvent> {
        let tagged = serde_json::json!({ "tipo": self.kind, "payload": self.payload });
        let event: ProductionEvent = serde_json::from_value(tagged)
            .map_err(|e| WorkflowError::validation(&self.kind, e.to_string()))?;
        event
            .validate()
            .map_err(|e| WorkflowError::validation(&self.kind, e.to_string()))?;
        Ok(event)
    }

    pub fn mark_processed(&mut self, at: DateTime<Utc>) {
        self.processed = true;
        self.processed_at = Some(at);
    }
}

impl Entity for ProductionEventRecord {
    type Id = EventId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
