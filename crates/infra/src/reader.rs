//! [`WorkflowReader`] over a store transaction.

use fabline_catalog::Product;
use fabline_core::{AssemblyGroupId, BatchId, OrderId, ProductId, StockPositionId};
use fabline_inventory::StockPosition;
use fabline_orders::Order;
use fabline_production::{
    AssemblyGroup, AssemblyInstanceId, BatchStatus, GroupKind, ProductionBatch, WorkflowError,
    WorkflowReader, WorkflowResult,
};

use crate::document_store::{Collection, DocumentStore, Filter, Query, StoreError, to_json};
use crate::transaction::Transaction;

/// Every load goes through the transaction, so it joins the commit's read set.
pub struct TxReader<'t, 's, S: ?Sized> {
    tx: &'t mut Transaction<'s, S>,
}

impl<'t, 's, S> TxReader<'t, 's, S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(tx: &'t mut Transaction<'s, S>) -> Self {
        Self { tx }
    }
}

fn store_err(err: StoreError) -> WorkflowError {
    WorkflowError::Store(err.to_string())
}

fn groups_of(order_id: OrderId) -> Query {
    Query::new(Collection::AssemblyGroups).filter(Filter::eq("order_id", order_id.to_string()))
}

impl<S> WorkflowReader for TxReader<'_, '_, S>
where
    S: DocumentStore + ?Sized,
{
    fn order(&mut self, id: OrderId) -> WorkflowResult<Option<Order>> {
        self.tx.get(&id.to_string()).map_err(store_err)
    }

    fn assembly_group(&mut self, id: AssemblyGroupId) -> WorkflowResult<Option<AssemblyGroup>> {
        self.tx.get(&id.to_string()).map_err(store_err)
    }

    fn group_for_instance(
        &mut self,
        order_id: OrderId,
        instance_id: &AssemblyInstanceId,
    ) -> WorkflowResult<Option<AssemblyGroup>> {
        let query = groups_of(order_id)
            .filter(Filter::eq("target.instance_id", instance_id.as_str()))
            .limit(1);
        let found: Vec<AssemblyGroup> = self.tx.query(query).map_err(store_err)?;
        Ok(found.into_iter().next())
    }

    fn groups_for_order(&mut self, order_id: OrderId) -> WorkflowResult<Vec<AssemblyGroup>> {
        self.tx.query(groups_of(order_id)).map_err(store_err)
    }

    fn packaging_group(&mut self, order_id: OrderId) -> WorkflowResult<Option<AssemblyGroup>> {
        let kind = to_json(&GroupKind::Packaging).map_err(store_err)?;
        let query = groups_of(order_id).filter(Filter::eq("kind", kind)).limit(1);
        let found: Vec<AssemblyGroup> = self.tx.query(query).map_err(store_err)?;
        Ok(found.into_iter().next())
    }

    fn batch(&mut self, id: BatchId) -> WorkflowResult<Option<ProductionBatch>> {
        self.tx.get(&id.to_string()).map_err(store_err)
    }

    fn open_batches(&mut self, composition_keys: &[String]) -> WorkflowResult<Vec<ProductionBatch>> {
        if composition_keys.is_empty() {
            return Ok(Vec::new());
        }
        let waiting = to_json(&BatchStatus::Waiting).map_err(store_err)?;
        let query = Query::new(Collection::ProductionBatches)
            .filter(Filter::is_in("composition_key", composition_keys.iter().cloned()))
            .filter(Filter::eq("status", waiting));
        self.tx.query(query).map_err(store_err)
    }

    fn batches_serving(
        &mut self,
        instance_ids: &[AssemblyInstanceId],
    ) -> WorkflowResult<Vec<ProductionBatch>> {
        if instance_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = Query::new(Collection::ProductionBatches).filter(Filter::array_contains_any(
            "instance_ids",
            instance_ids.iter().map(|id| id.as_str().to_string()),
        ));
        self.tx.query(query).map_err(store_err)
    }

    fn product(&mut self, id: &ProductId) -> WorkflowResult<Option<Product>> {
        self.tx.get(&id.to_string()).map_err(store_err)
    }

    fn stock_position(&mut self, id: &StockPositionId) -> WorkflowResult<Option<StockPosition>> {
        self.tx.get(&id.to_string()).map_err(store_err)
    }
}
