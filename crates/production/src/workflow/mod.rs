//! Workflow state machine.
//!
//! One handler per event kind. Every handler loads what it needs through a
//! [`WorkflowReader`] first, then computes a [`Decision`] from the loaded
//! state without touching the store: the writes to commit and the events to
//! append next. Committing the decision is the executor's job, so the
//! decision logic is testable without a store and safe to re-run on an
//! optimistic-concurrency retry.

pub mod assembly;
pub mod order;
pub mod packaging;
pub mod production;

use core::str::FromStr;

use chrono::{DateTime, Utc};

use fabline_catalog::{Product, ProductType};
use fabline_core::{AssemblyGroupId, BatchId, DomainError, EventId, OrderId, ProductId, StockPositionId};
use fabline_inventory::{StockMovement, StockPosition};
use fabline_orders::Order;

use crate::batch::ProductionBatch;
use crate::error::WorkflowResult;
use crate::event::{ComponentArrival, Destination, PackagingArrival, ProductionEvent, ProductionEventRecord};
use crate::group::AssemblyGroup;
use crate::identifier::{AssemblyInstanceId, InstancePath};
use crate::reconciliation;

/// Read access to workflow state, scoped to one handler run.
///
/// Implementations backed by a transactional store record every read so the
/// commit can be validated against them.
pub trait WorkflowReader {
    fn order(&mut self, id: OrderId) -> WorkflowResult<Option<Order>>;

    fn assembly_group(&mut self, id: AssemblyGroupId) -> WorkflowResult<Option<AssemblyGroup>>;

    /// The assembly group building a given instance.
    fn group_for_instance(
        &mut self,
        order_id: OrderId,
        instance_id: &AssemblyInstanceId,
    ) -> WorkflowResult<Option<AssemblyGroup>>;

    /// Every group of an order, packaging group included.
    fn groups_for_order(&mut self, order_id: OrderId) -> WorkflowResult<Vec<AssemblyGroup>>;

    fn packaging_group(&mut self, order_id: OrderId) -> WorkflowResult<Option<AssemblyGroup>>;

    fn batch(&mut self, id: BatchId) -> WorkflowResult<Option<ProductionBatch>>;

    /// Waiting batches with one of the given composition keys.
    fn open_batches(&mut self, composition_keys: &[String]) -> WorkflowResult<Vec<ProductionBatch>>;

    /// Batches serving any of the given instances.
    fn batches_serving(
        &mut self,
        instance_ids: &[AssemblyInstanceId],
    ) -> WorkflowResult<Vec<ProductionBatch>>;

    fn product(&mut self, id: &ProductId) -> WorkflowResult<Option<Product>>;

    fn stock_position(&mut self, id: &StockPositionId) -> WorkflowResult<Option<StockPosition>>;
}

/// A document write produced by a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    PutOrder(Order),
    PutGroup(AssemblyGroup),
    PutBatch(ProductionBatch),
    DeleteBatch(BatchId),
    AppendMovement(StockMovement),
    PutPosition(StockPosition),
}

/// Outcome of one handler run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decision {
    pub writes: Vec<Write>,
    pub emits: Vec<ProductionEvent>,
    /// Set when the handler found nothing it could act on.
    pub skipped: Option<String>,
}

impl Decision {
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn is_noop(&self) -> bool {
        self.writes.is_empty() && self.emits.is_empty()
    }

    pub fn put_order(&mut self, order: Order) {
        self.writes.push(Write::PutOrder(order));
    }

    pub fn put_group(&mut self, group: AssemblyGroup) {
        self.writes.push(Write::PutGroup(group));
    }

    pub fn put_batch(&mut self, batch: ProductionBatch) {
        self.writes.push(Write::PutBatch(batch));
    }

    pub fn delete_batch(&mut self, id: BatchId) {
        self.writes.push(Write::DeleteBatch(id));
    }

    pub fn append_movement(&mut self, movement: StockMovement) {
        self.writes.push(Write::AppendMovement(movement));
    }

    pub fn put_position(&mut self, position: StockPosition) {
        self.writes.push(Write::PutPosition(position));
    }

    pub fn emit(&mut self, event: ProductionEvent) {
        self.emits.push(event);
    }
}

/// Product decision for a workflow edge whose behavior is not settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeDecision {
    /// Apply the status change, log the pending decision, emit nothing.
    #[default]
    Unresolved,
    /// Emit the next event like every other completion.
    Forward,
}

impl FromStr for EdgeDecision {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unresolved" => Ok(EdgeDecision::Unresolved),
            "forward" => Ok(EdgeDecision::Forward),
            other => Err(DomainError::validation(format!(
                "unknown edge decision '{other}' (expected unresolved|forward)"
            ))),
        }
    }
}

/// Handler-facing workflow configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkflowPolicy {
    /// Whether a finished multi-print piece assembly moves on to its parent.
    pub piece_assembly_forwarding: EdgeDecision,
}

/// Per-run handler context.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub event_id: EventId,
    pub now: DateTime<Utc>,
    pub policy: WorkflowPolicy,
}

/// Parse `record` and run its handler.
pub fn handle(
    record: &ProductionEventRecord,
    reader: &mut dyn WorkflowReader,
    policy: WorkflowPolicy,
    now: DateTime<Utc>,
) -> WorkflowResult<Decision> {
    let event = record.parse()?;
    let ctx = Context {
        event_id: record.id,
        now,
        policy,
    };
    dispatch(&ctx, event, reader)
}

fn dispatch(
    ctx: &Context,
    event: ProductionEvent,
    reader: &mut dyn WorkflowReader,
) -> WorkflowResult<Decision> {
    use crate::group::{ComponentList, GroupKind};
    use ProductionEvent as E;

    match event {
        E::OrderCreated(p) => order::on_order_created(ctx, p, reader),
        E::ProductionStarted(p) => production::on_production_started(ctx, p, reader),
        E::ProductionCompleted(p) => production::on_production_completed(ctx, p, reader),
        E::PartsIntoPieceAssembly(p) => assembly::on_parts_arrival(ctx, p, reader),
        E::PieceIntoModelAssembly(a) => {
            assembly::on_component_arrival(ctx, GroupKind::Model, ComponentList::Pieces, a, reader)
        }
        E::PieceIntoKitAssembly(a) => {
            assembly::on_component_arrival(ctx, GroupKind::Kit, ComponentList::Pieces, a, reader)
        }
        E::ModelIntoKitAssembly(a) => {
            assembly::on_component_arrival(ctx, GroupKind::Kit, ComponentList::Models, a, reader)
        }
        E::PieceAssemblyCompleted(c) => assembly::on_assembly_completed(ctx, GroupKind::Piece, c, reader),
        E::ModelAssemblyCompleted(c) => assembly::on_assembly_completed(ctx, GroupKind::Model, c, reader),
        E::KitAssemblyCompleted(c) => assembly::on_assembly_completed(ctx, GroupKind::Kit, c, reader),
        E::KitIntoPackaging(a) => packaging::on_packaging_arrival(ctx, ProductType::Kit, a, reader),
        E::ModelIntoPackaging(a) => packaging::on_packaging_arrival(ctx, ProductType::Model, a, reader),
        E::PieceIntoPackaging(a) => packaging::on_packaging_arrival(ctx, ProductType::Piece, a, reader),
        E::KitIntoStock(e) => Ok(packaging::on_stock_entry(ctx, ProductType::Kit, e)),
        E::ModelIntoStock(e) => Ok(packaging::on_stock_entry(ctx, ProductType::Model, e)),
        E::PieceIntoStock(e) => Ok(packaging::on_stock_entry(ctx, ProductType::Piece, e)),
        E::KitIntoOrder(t) => packaging::on_order_transfer(ctx, ProductType::Kit, t, reader),
        E::ModelIntoOrder(t) => packaging::on_order_transfer(ctx, ProductType::Model, t, reader),
        E::PieceIntoOrder(t) => packaging::on_order_transfer(ctx, ProductType::Piece, t, reader),
        E::StockUsed(u) => reconciliation::on_stock_used(ctx, u, reader),
        E::OrderCompleted(c) => packaging::on_order_completed(ctx, c, reader),
    }
}

/// The event moving a finished instance to the next level up: its parent's
/// assembly, or the order's packaging for top-level products.
pub(crate) fn route_finished(
    order_id: OrderId,
    instance: &InstancePath,
    quantity: u32,
    source_group_id: Option<AssemblyGroupId>,
    destinations: Vec<Destination>,
) -> Option<ProductionEvent> {
    let product_id = instance.product_id().clone();
    let product_type = instance.product_type();

    let Some(parent) = instance.parent() else {
        let arrival = PackagingArrival {
            order_id,
            product_id,
            quantity,
            assembly_instance_id: Some(instance.id()),
            source_group_id,
            destinations,
        };
        return ProductionEvent::into_packaging(product_type, arrival);
    };

    if !destinations.is_empty() {
        tracing::warn!(
            instance_id = %instance.id(),
            "destinations only apply to top-level products; ignoring"
        );
    }
    let arrival = ComponentArrival {
        order_id,
        target_instance_id: parent.id(),
        product_id,
        product_type,
        quantity,
        component_instance_id: Some(instance.id()),
    };
    match (parent.product_type(), product_type) {
        (ProductType::Model, ProductType::Piece) => Some(ProductionEvent::PieceIntoModelAssembly(arrival)),
        (ProductType::Kit, ProductType::Piece) => Some(ProductionEvent::PieceIntoKitAssembly(arrival)),
        (ProductType::Kit, ProductType::Model) => Some(ProductionEvent::ModelIntoKitAssembly(arrival)),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory reader for handler tests, with a tiny event pump.

    use std::collections::{HashMap, VecDeque};

    use super::*;
    use crate::group::GroupKind;

    #[derive(Debug, Default)]
    pub(crate) struct MemoryReader {
        pub orders: HashMap<OrderId, Order>,
        pub groups: Vec<AssemblyGroup>,
        pub batches: Vec<ProductionBatch>,
        pub products: HashMap<ProductId, Product>,
        pub positions: HashMap<StockPositionId, StockPosition>,
        pub movements: Vec<StockMovement>,
        pub policy: WorkflowPolicy,
    }

    impl MemoryReader {
        pub(crate) fn apply(&mut self, decision: &Decision) {
            for write in &decision.writes {
                match write {
                    Write::PutOrder(o) => {
                        self.orders.insert(o.id, o.clone());
                    }
                    Write::PutGroup(g) => match self.groups.iter_mut().find(|x| x.id == g.id) {
                        Some(slot) => *slot = g.clone(),
                        None => self.groups.push(g.clone()),
                    },
                    Write::PutBatch(b) => match self.batches.iter_mut().find(|x| x.id == b.id) {
                        Some(slot) => *slot = b.clone(),
                        None => self.batches.push(b.clone()),
                    },
                    Write::DeleteBatch(id) => self.batches.retain(|b| &b.id != id),
                    Write::AppendMovement(m) => self.movements.push(m.clone()),
                    Write::PutPosition(p) => {
                        self.positions.insert(p.id.clone(), p.clone());
                    }
                }
            }
        }

        /// Run one event and apply its writes.
        pub(crate) fn run(&mut self, event: &ProductionEvent) -> WorkflowResult<(EventId, Decision)> {
            let record = ProductionEventRecord::new(event, None, Utc::now())
                .map_err(|e| crate::error::WorkflowError::Store(e.to_string()))?;
            let policy = self.policy;
            let decision = handle(&record, self, policy, Utc::now())?;
            self.apply(&decision);
            Ok((record.id, decision))
        }

        /// Run an event and everything it transitively emits, returning every
        /// event kind handled in order.
        pub(crate) fn run_chain(&mut self, event: ProductionEvent) -> WorkflowResult<Vec<&'static str>> {
            use fabline_events::Event;

            let mut queue = VecDeque::from([event]);
            let mut handled = Vec::new();
            while let Some(next) = queue.pop_front() {
                handled.push(next.event_type());
                let (_, decision) = self.run(&next)?;
                queue.extend(decision.emits);
            }
            Ok(handled)
        }

        pub(crate) fn group(&self, kind: GroupKind) -> Vec<&AssemblyGroup> {
            self.groups.iter().filter(|g| g.kind == kind).collect()
        }
    }

    impl WorkflowReader for MemoryReader {
        fn order(&mut self, id: OrderId) -> WorkflowResult<Option<Order>> {
            Ok(self.orders.get(&id).cloned())
        }

        fn assembly_group(&mut self, id: AssemblyGroupId) -> WorkflowResult<Option<AssemblyGroup>> {
            Ok(self.groups.iter().find(|g| g.id == id).cloned())
        }

        fn group_for_instance(
            &mut self,
            order_id: OrderId,
            instance_id: &AssemblyInstanceId,
        ) -> WorkflowResult<Option<AssemblyGroup>> {
            Ok(self
                .groups
                .iter()
                .find(|g| g.order_id == order_id && g.instance_id() == Some(instance_id))
                .cloned())
        }

        fn groups_for_order(&mut self, order_id: OrderId) -> WorkflowResult<Vec<AssemblyGroup>> {
            Ok(self.groups.iter().filter(|g| g.order_id == order_id).cloned().collect())
        }

        fn packaging_group(&mut self, order_id: OrderId) -> WorkflowResult<Option<AssemblyGroup>> {
            Ok(self
                .groups
                .iter()
                .find(|g| g.order_id == order_id && g.kind == GroupKind::Packaging)
                .cloned())
        }

        fn batch(&mut self, id: BatchId) -> WorkflowResult<Option<ProductionBatch>> {
            Ok(self.batches.iter().find(|b| b.id == id).cloned())
        }

        fn open_batches(&mut self, keys: &[String]) -> WorkflowResult<Vec<ProductionBatch>> {
            Ok(self
                .batches
                .iter()
                .filter(|b| b.is_open() && keys.contains(&b.composition_key))
                .cloned()
                .collect())
        }

        fn batches_serving(
            &mut self,
            instance_ids: &[AssemblyInstanceId],
        ) -> WorkflowResult<Vec<ProductionBatch>> {
            Ok(self
                .batches
                .iter()
                .filter(|b| b.instance_ids.iter().any(|id| instance_ids.contains(id)))
                .cloned()
                .collect())
        }

        fn product(&mut self, id: &ProductId) -> WorkflowResult<Option<Product>> {
            Ok(self.products.get(id).cloned())
        }

        fn stock_position(&mut self, id: &StockPositionId) -> WorkflowResult<Option<StockPosition>> {
            Ok(self.positions.get(id).cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::PathStep;

    fn pid(s: &str) -> ProductId {
        ProductId::new(s).unwrap()
    }

    #[test]
    fn routing_follows_the_parent_type() {
        let order = OrderId::new();
        let kit = InstancePath::root(order, PathStep::new(pid("kit3"), ProductType::Kit, 1));
        let model = kit.child(PathStep::new(pid("model5"), ProductType::Model, 1));
        let piece_in_model = model.child(PathStep::new(pid("piece9"), ProductType::Piece, 1));
        let piece_in_kit = kit.child(PathStep::new(pid("piece4"), ProductType::Piece, 1));

        let route = |p: &InstancePath| route_finished(order, p, 1, None, vec![]);
        assert!(matches!(route(&piece_in_model), Some(ProductionEvent::PieceIntoModelAssembly(a)) if a.target_instance_id == model.id()));
        assert!(matches!(route(&piece_in_kit), Some(ProductionEvent::PieceIntoKitAssembly(_))));
        assert!(matches!(route(&model), Some(ProductionEvent::ModelIntoKitAssembly(_))));
        assert!(matches!(route(&kit), Some(ProductionEvent::KitIntoPackaging(a)) if a.assembly_instance_id == Some(kit.id())));
    }

    #[test]
    fn edge_decision_parses_case_insensitively() {
        assert_eq!("Forward".parse::<EdgeDecision>().unwrap(), EdgeDecision::Forward);
        assert_eq!(" unresolved ".parse::<EdgeDecision>().unwrap(), EdgeDecision::Unresolved);
        assert!("maybe".parse::<EdgeDecision>().is_err());
        assert_eq!(WorkflowPolicy::default().piece_assembly_forwarding, EdgeDecision::Unresolved);
    }
}
