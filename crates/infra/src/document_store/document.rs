use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use fabline_catalog::Product;
use fabline_core::Entity;
use fabline_inventory::{StockMovement, StockPosition};
use fabline_orders::Order;
use fabline_production::{AssemblyGroup, ProductionBatch, ProductionEventRecord};

use super::r#trait::StoreError;

/// Named document collections, one per entity kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Orders,
    AssemblyGroups,
    ProductionBatches,
    /// The production event log; creating a document here fires a trigger.
    Events,
    StockMovements,
    Products,
    StockPositions,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::Orders => "orders",
            Collection::AssemblyGroups => "assembly_groups",
            Collection::ProductionBatches => "production_batches",
            Collection::Events => "production_events",
            Collection::StockMovements => "stock_movements",
            Collection::Products => "products",
            Collection::StockPositions => "stock_positions",
        }
    }
}

impl core::fmt::Display for Collection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed document persisted as JSON in one collection.
///
/// Documents are keyed by their entity id's string form.
pub trait Document: Entity + Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    fn key(&self) -> String {
        self.id().to_string()
    }
}

impl Document for Order {
    const COLLECTION: Collection = Collection::Orders;
}

impl Document for AssemblyGroup {
    const COLLECTION: Collection = Collection::AssemblyGroups;
}

impl Document for ProductionBatch {
    const COLLECTION: Collection = Collection::ProductionBatches;
}

impl Document for ProductionEventRecord {
    const COLLECTION: Collection = Collection::Events;
}

impl Document for StockMovement {
    const COLLECTION: Collection = Collection::StockMovements;
}

impl Document for Product {
    const COLLECTION: Collection = Collection::Products;
}

impl Document for StockPosition {
    const COLLECTION: Collection = Collection::StockPositions;
}

/// A document as the store holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub collection: Collection,
    pub key: String,
    /// Starts at 1 on first creation and increases by one per committed update;
    /// a deleted key recreated later continues from its last version.
    pub version: u64,
    /// Store-wide commit sequence at creation; orders query results.
    pub sequence: u64,
    pub body: JsonValue,
}

impl StoredDocument {
    pub fn decode<D: Document>(&self) -> Result<D, StoreError> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            StoreError::Serialization(format!("{}/{}: {e}", self.collection, self.key))
        })
    }
}

pub fn encode<D: Document>(document: &D) -> Result<JsonValue, StoreError> {
    to_json(document)
}

/// Serialize a query operand or document body.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<JsonValue, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}
