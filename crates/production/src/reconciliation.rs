//! Stock reconciliation (`uso_estoque`).
//!
//! Warehouse stock stands in for production or assembly at any level of an
//! order's tree. The consumed units are pinned to concrete instances; those
//! instances and everything nested under them are credited on the packaging
//! tree, their assembly groups are closed from stock, and the batches printing
//! for them are split into a still-to-produce remainder and a stock share.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

use fabline_catalog::ProductType;
use fabline_core::{BatchId, ProductId, StockPositionId};
use fabline_inventory::{StockMovement, StockPosition};
use fabline_orders::{Order, OrderStatus};

use crate::batch::{ProductionBatch, Remainder};
use crate::error::{WorkflowError, WorkflowResult};
use crate::event::{HierarchyLevel, StockUsage};
use crate::explosion::instances_of;
use crate::group::{
    AssemblyGroup, ComponentList, Credit, CreditOutcome, FulfillmentOrigin, GroupKind,
};
use crate::identifier::{AssemblyInstance, AssemblyInstanceId, InstancePath};
use crate::workflow::packaging::settle_packaging;
use crate::workflow::{Context, Decision, WorkflowReader};

/// What a stock usage satisfies, by hierarchy level and product type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationTarget {
    KitRoot,
    ModelRoot,
    PieceRoot,
    /// A model inside a kit.
    ModelNested,
    /// A piece inside a model or kit.
    PieceNested,
}

impl ReconciliationTarget {
    /// `None` for combinations that cannot occur in a product tree.
    pub fn classify(level: HierarchyLevel, product_type: ProductType) -> Option<Self> {
        match (level, product_type) {
            (HierarchyLevel::Root, ProductType::Kit) => Some(Self::KitRoot),
            (HierarchyLevel::Root, ProductType::Model) => Some(Self::ModelRoot),
            (HierarchyLevel::Root, ProductType::Piece) => Some(Self::PieceRoot),
            (HierarchyLevel::Nested, ProductType::Model) => Some(Self::ModelNested),
            (HierarchyLevel::Nested, ProductType::Piece) => Some(Self::PieceNested),
            (HierarchyLevel::Nested, ProductType::Kit) | (_, ProductType::Part) => None,
        }
    }

    pub fn is_root(self) -> bool {
        matches!(self, Self::KitRoot | Self::ModelRoot | Self::PieceRoot)
    }

    /// Product types a nested usage's parent may have.
    fn parent_types(self) -> &'static [ProductType] {
        match self {
            Self::ModelNested => &[ProductType::Kit],
            Self::PieceNested => &[ProductType::Model, ProductType::Kit],
            Self::KitRoot | Self::ModelRoot | Self::PieceRoot => &[],
        }
    }
}

pub(crate) fn on_stock_used(
    ctx: &Context,
    usage: StockUsage,
    reader: &mut dyn WorkflowReader,
) -> WorkflowResult<Decision> {
    let target = ReconciliationTarget::classify(usage.level, usage.product_type).ok_or_else(|| {
        WorkflowError::validation(
            "uso_estoque",
            format!("a {:?} {} cannot be taken from stock", usage.level, usage.product_type),
        )
    })?;

    let order = reader
        .order(usage.order_id)?
        .ok_or_else(|| WorkflowError::missing("order", usage.order_id))?;
    let packaging = reader.packaging_group(order.id)?;
    if packaging.as_ref().is_some_and(|p| p.has_event(ctx.event_id)) {
        debug!(order_id = %order.id, event_id = %ctx.event_id, "stock usage already reconciled");
        return Ok(Decision::noop());
    }
    if order.status == OrderStatus::Completed {
        warn!(order_id = %order.id, "stock used on a completed order; skipping");
        return Ok(Decision::skip(format!("order {} is already completed", order.id)));
    }

    resolve_products(target, &usage, reader)?;
    let positions = load_positions(&usage, reader)?;

    let instances = instances_of(&order)?;
    let chosen = select_instances(target, &usage, &instances, packaging.as_ref())?;
    let covered: HashSet<AssemblyInstanceId> = instances
        .iter()
        .filter(|i| chosen.iter().any(|c| i.path.is_self_or_descendant_of(c)))
        .map(|i| i.id.clone())
        .collect();
    check_nested_products(&usage, &instances, &chosen);

    let groups: Vec<AssemblyGroup> = reader
        .groups_for_order(order.id)?
        .into_iter()
        .filter(|g| g.kind != GroupKind::Packaging)
        .collect();
    let mut covered_ids: Vec<AssemblyInstanceId> = covered.iter().cloned().collect();
    covered_ids.sort();
    let batches = reader.batches_serving(&covered_ids)?;

    let mut run = Reconciliation {
        ctx,
        credit: Credit::new(FulfillmentOrigin::Stock, ctx.event_id, ctx.now),
        product_id: usage.product_id.clone(),
        chosen,
        covered,
        order,
        packaging,
        packaging_changed: false,
        groups: groups.into_iter().map(|g| (g, false)).collect(),
        batches,
        decision: Decision::noop(),
    };
    match target {
        ReconciliationTarget::KitRoot | ReconciliationTarget::ModelRoot | ReconciliationTarget::PieceRoot => {
            reconcile_root(&mut run)
        }
        ReconciliationTarget::ModelNested => reconcile_nested(&mut run, ComponentList::Models),
        ReconciliationTarget::PieceNested => reconcile_nested(&mut run, ComponentList::Pieces),
    }
    run.debit(&usage, positions);
    info!(
        order_id = %usage.order_id,
        product_id = %usage.product_id,
        target = ?target,
        quantity = usage.quantity,
        writes = run.decision.writes.len(),
        "stock reconciled"
    );
    Ok(run.finish())
}

/// Every product the payload names must exist in the catalog with the stated type.
fn resolve_products(
    target: ReconciliationTarget,
    usage: &StockUsage,
    reader: &mut dyn WorkflowReader,
) -> WorkflowResult<()> {
    let mut expect = |id: &ProductId, types: &[ProductType]| -> WorkflowResult<()> {
        let product = reader
            .product(id)?
            .ok_or_else(|| WorkflowError::validation("uso_estoque", format!("unknown product {id}")))?;
        if !types.contains(&product.product_type) {
            return Err(WorkflowError::validation(
                "uso_estoque",
                format!("product {id} is a {}, expected one of {types:?}", product.product_type),
            ));
        }
        Ok(())
    };

    expect(&usage.product_id, &[usage.product_type])?;
    for nested in &usage.nested_products {
        expect(&nested.product_id, &[nested.product_type])?;
    }
    if let Some(parent) = &usage.parent_product_id {
        if target.is_root() {
            warn!(product_id = %usage.product_id, "parent product ignored for root usage");
        } else {
            expect(parent, target.parent_types())?;
        }
    }
    Ok(())
}

/// Debited positions with their aggregated quantities, already taken off on-hand stock.
fn load_positions(
    usage: &StockUsage,
    reader: &mut dyn WorkflowReader,
) -> WorkflowResult<Vec<(StockPosition, u64)>> {
    let mut totals: BTreeMap<&StockPositionId, u64> = BTreeMap::new();
    for debit in &usage.stock_positions {
        *totals.entry(&debit.position_id).or_default() += u64::from(debit.quantity);
    }

    let mut positions = Vec::with_capacity(totals.len());
    for (id, quantity) in totals {
        let mut position = reader
            .stock_position(id)?
            .ok_or_else(|| WorkflowError::validation("uso_estoque", format!("unknown stock position {id}")))?;
        position.debit(&usage.product_id, quantity)?;
        positions.push((position, quantity));
    }
    Ok(positions)
}

/// Pin the consumed units to instances: the ones named in the payload, or
/// else the first instances of the product still uncovered.
fn select_instances(
    target: ReconciliationTarget,
    usage: &StockUsage,
    instances: &[AssemblyInstance],
    packaging: Option<&AssemblyGroup>,
) -> WorkflowResult<Vec<InstancePath>> {
    let candidates: Vec<&AssemblyInstance> = instances
        .iter()
        .filter(|i| i.product_id() == &usage.product_id && i.product_type() == usage.product_type)
        .filter(|i| i.path.is_top_level() == target.is_root())
        .filter(|i| match (&usage.parent_product_id, target.is_root()) {
            (Some(parent), false) => i
                .path
                .steps()
                .split_last()
                .is_some_and(|(_, ancestors)| ancestors.iter().any(|s| &s.product_id == parent)),
            _ => true,
        })
        .collect();
    let needed = usage.quantity as usize;

    if !usage.assembly_instance_ids.is_empty() {
        let mut seen = HashSet::new();
        let mut chosen = Vec::with_capacity(needed);
        for id in &usage.assembly_instance_ids {
            let Some(instance) = candidates.iter().find(|i| &i.id == id) else {
                return Err(WorkflowError::validation(
                    "uso_estoque",
                    format!("instance {id} does not match the consumed product"),
                ));
            };
            if is_covered(packaging, id) {
                return Err(WorkflowError::validation(
                    "uso_estoque",
                    format!("instance {id} is already fulfilled"),
                ));
            }
            if seen.insert(id) {
                chosen.push(instance.path.clone());
            }
        }
        if chosen.len() != needed {
            return Err(WorkflowError::validation(
                "uso_estoque",
                format!("{} distinct instances named for {needed} units", chosen.len()),
            ));
        }
        return Ok(chosen);
    }

    let chosen: Vec<InstancePath> = candidates
        .iter()
        .filter(|i| !is_covered(packaging, &i.id))
        .take(needed)
        .map(|i| i.path.clone())
        .collect();
    if chosen.len() < needed {
        return Err(WorkflowError::validation(
            "uso_estoque",
            format!(
                "only {} uncovered instances of {} for {needed} units",
                chosen.len(),
                usage.product_id
            ),
        ));
    }
    Ok(chosen)
}

fn is_covered(packaging: Option<&AssemblyGroup>, id: &AssemblyInstanceId) -> bool {
    let Some(packaging) = packaging else {
        return false;
    };
    let mut nodes = Vec::new();
    for entry in &packaging.required_products {
        entry.visit(1, &mut nodes);
    }
    nodes
        .iter()
        .find(|(_, node)| node.instance_ids.contains(id))
        .is_some_and(|(_, node)| node.is_satisfied() || node.ledger.covers(id))
}

/// Warn when the declared sub-products disagree with the order's structure.
fn check_nested_products(usage: &StockUsage, instances: &[AssemblyInstance], chosen: &[InstancePath]) {
    for nested in &usage.nested_products {
        let found = instances
            .iter()
            .filter(|i| i.product_id() == &nested.product_id && i.product_type() == nested.product_type)
            .filter(|i| chosen.iter().any(|c| i.path.is_descendant_of(c)))
            .count();
        if found != nested.quantity as usize {
            warn!(
                product_id = %nested.product_id,
                declared = nested.quantity,
                found,
                "nested product does not match the order structure"
            );
        }
    }
}

struct Reconciliation<'a> {
    ctx: &'a Context,
    credit: Credit,
    product_id: ProductId,
    chosen: Vec<InstancePath>,
    covered: HashSet<AssemblyInstanceId>,
    order: Order,
    packaging: Option<AssemblyGroup>,
    packaging_changed: bool,
    /// Groups of the order, flagged once changed.
    groups: Vec<(AssemblyGroup, bool)>,
    batches: Vec<ProductionBatch>,
    decision: Decision,
}

/// A top-level product taken from stock: its own tree is done.
fn reconcile_root(run: &mut Reconciliation<'_>) {
    run.credit_packaging();
    run.close_covered_groups();
    run.split_batches();
}

/// A nested product taken from stock also counts toward its parent's assembly.
fn reconcile_nested(run: &mut Reconciliation<'_>, list: ComponentList) {
    run.credit_packaging();
    run.close_covered_groups();
    run.credit_parents(list);
    run.split_batches();
}

impl Reconciliation<'_> {
    /// Credit the chosen instances and everything nested under them on the packaging tree.
    fn credit_packaging(&mut self) {
        let Some(packaging) = self.packaging.as_mut() else {
            warn!(order_id = %self.order.id, "order has no packaging group; skipping packaging credit");
            return;
        };
        let credited: u32 = packaging
            .required_products
            .iter_mut()
            .map(|entry| entry.credit_subtree(self.credit, &self.covered))
            .sum();
        if credited == 0 {
            return;
        }
        self.packaging_changed = true;
        if settle_packaging(self.ctx, packaging, &mut self.order) {
            self.decision.put_order(self.order.clone());
        }
        debug!(group_id = %packaging.id, credited, "packaging tree credited from stock");
    }

    fn close_covered_groups(&mut self) {
        for (group, changed) in &mut self.groups {
            let Some(instance_id) = group.instance_id() else {
                continue;
            };
            if !self.covered.contains(instance_id) {
                continue;
            }
            if group.fulfill_from_stock(self.credit).is_applied() {
                *changed = true;
            } else {
                debug!(group_id = %group.id, status = ?group.status, "group already past assembly");
            }
        }
    }

    /// Credit the consumed product on each chosen instance's parent group.
    fn credit_parents(&mut self, list: ComponentList) {
        let mut per_parent: Vec<(InstancePath, Vec<AssemblyInstanceId>)> = Vec::new();
        for path in &self.chosen {
            let Some(parent) = path.parent() else {
                continue;
            };
            match per_parent.iter_mut().find(|(p, _)| p == &parent) {
                Some((_, ids)) => ids.push(path.id()),
                None => per_parent.push((parent, vec![path.id()])),
            }
        }

        for (parent, ids) in per_parent {
            let parent_id = parent.id();
            let Some((group, changed)) = self
                .groups
                .iter_mut()
                .find(|(g, _)| g.instance_id() == Some(&parent_id))
            else {
                warn!(instance_id = %parent_id, "no assembly group for parent instance; skipping");
                continue;
            };
            let units = u32::try_from(ids.len()).unwrap_or(u32::MAX);
            match group.credit_component(list, &self.product_id, self.credit, units, ids) {
                CreditOutcome::Credited(_) => {
                    group.refresh_status(self.ctx.now);
                    *changed = true;
                }
                CreditOutcome::NotRequired => {
                    warn!(group_id = %group.id, product_id = %self.product_id, "parent group does not require this product")
                }
                CreditOutcome::AlreadySatisfied | CreditOutcome::Duplicate => {}
            }
        }
    }

    fn split_batches(&mut self) {
        for batch in std::mem::take(&mut self.batches) {
            let Some(split) = batch.split_for_stock(&self.covered, BatchId::new(), self.ctx.now) else {
                debug!(batch_id = %batch.id, status = ?batch.status, "batch unaffected by stock usage");
                continue;
            };
            match split.remainder {
                Remainder::Keep(kept) => {
                    debug!(batch_id = %kept.id, units = kept.quantity_to_produce, status = ?kept.status, "batch shrunk");
                    self.decision.put_batch(kept);
                }
                Remainder::Delete(id) => {
                    debug!(batch_id = %id, "batch fully covered by stock; deleting");
                    self.decision.delete_batch(id);
                }
            }
            if let Some(stock) = split.stock_batch {
                self.decision.put_batch(stock);
            }
        }
    }

    fn debit(&mut self, usage: &StockUsage, positions: Vec<(StockPosition, u64)>) {
        for (position, quantity) in positions {
            self.decision.append_movement(StockMovement::debit(
                position.id.clone(),
                position.location_id.clone(),
                usage.product_id.clone(),
                usage.product_type,
                quantity,
                usage.order_id,
                self.ctx.event_id,
                self.ctx.now,
            ));
            self.decision.put_position(position);
        }
    }

    fn finish(mut self) -> Decision {
        let changed = self.packaging_changed;
        if let Some(packaging) = self.packaging.filter(|_| changed) {
            self.decision.put_group(packaging);
        }
        for (group, changed) in self.groups {
            if changed {
                self.decision.put_group(group);
            }
        }
        self.decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchStatus;
    use crate::event::{BatchRef, NestedProduct, OrderRef, ProductionEvent, ProductionEventRecord, StockDebit};
    use crate::explosion::tests::{kit_node, model_node, piece_node, test_order};
    use crate::group::AssemblyStatus;
    use crate::workflow::testing::MemoryReader;
    use crate::workflow::{WorkflowPolicy, handle};
    use chrono::Utc;
    use fabline_catalog::{PieceKind, Product, ProductNode};
    use fabline_core::{LocationId, OrderId, ProductId};
    use fabline_inventory::MovementKind;

    fn pid(s: &str) -> ProductId {
        ProductId::new(s).unwrap()
    }

    fn catalog(reader: &mut MemoryReader, items: &[(&str, ProductType)]) {
        for (id, product_type) in items {
            reader.products.insert(
                pid(id),
                Product {
                    id: pid(id),
                    product_type: *product_type,
                    name: id.to_string(),
                    sku: None,
                    piece_kind: None,
                    components: vec![],
                },
            );
        }
    }

    fn stock(reader: &mut MemoryReader, position: &str, product: &str, product_type: ProductType, on_hand: i64) {
        let id = StockPositionId::new(position).unwrap();
        reader.positions.insert(
            id.clone(),
            StockPosition {
                id,
                product_id: pid(product),
                product_type,
                location_id: LocationId::new("main").unwrap(),
                quantity: on_hand,
            },
        );
    }

    fn seeded(reader: &mut MemoryReader, products: Vec<ProductNode>) -> OrderId {
        let order = test_order(1, products);
        let id = order.id;
        reader.orders.insert(id, order);
        reader
            .run(&ProductionEvent::OrderCreated(OrderRef { order_id: id }))
            .unwrap();
        id
    }

    fn usage(order_id: OrderId, product: &str, product_type: ProductType, level: HierarchyLevel, quantity: u32) -> StockUsage {
        StockUsage {
            order_id,
            product_id: pid(product),
            product_type,
            level,
            quantity,
            parent_product_id: None,
            assembly_instance_ids: vec![],
            nested_products: vec![],
            stock_positions: vec![StockDebit {
                position_id: StockPositionId::new("A-01").unwrap(),
                quantity,
            }],
        }
    }

    fn five_kits(reader: &mut MemoryReader) -> OrderId {
        catalog(reader, &[("kit3", ProductType::Kit)]);
        stock(reader, "A-01", "kit3", ProductType::Kit, 10);
        seeded(
            reader,
            vec![kit_node(
                "kit3",
                5,
                vec![model_node("model5", 1, vec![piece_node("piece9", 1, PieceKind::Simple, Some(5))])],
            )],
        )
    }

    #[test]
    fn kits_from_stock_split_the_batch_and_credit_the_tree() {
        let mut reader = MemoryReader::default();
        let order_id = five_kits(&mut reader);
        assert_eq!(reader.batches.len(), 1);

        let mut event = usage(order_id, "kit3", ProductType::Kit, HierarchyLevel::Root, 2);
        event.nested_products = vec![
            NestedProduct {
                product_id: pid("model5"),
                product_type: ProductType::Model,
                quantity: 2,
            },
            NestedProduct {
                product_id: pid("piece9"),
                product_type: ProductType::Piece,
                quantity: 2,
            },
        ];
        catalog(&mut reader, &[("model5", ProductType::Model), ("piece9", ProductType::Piece)]);
        reader.run(&ProductionEvent::StockUsed(event)).unwrap();

        let remainder = reader.batches.iter().find(|b| b.split_from.is_none()).unwrap();
        let stock_batch = reader.batches.iter().find(|b| b.split_from.is_some()).unwrap();
        assert_eq!(remainder.quantity_to_produce, 3);
        assert_eq!(remainder.status, BatchStatus::Waiting);
        assert_eq!(stock_batch.quantity_to_produce, 2);
        assert_eq!(stock_batch.status, BatchStatus::CompletedByStock);

        let packaging = reader.group(GroupKind::Packaging)[0];
        let mut nodes = Vec::new();
        packaging.required_products[0].visit(1, &mut nodes);
        assert_eq!(nodes.len(), 3);
        for (_, node) in nodes {
            assert_eq!(node.ledger.fulfilled_by(FulfillmentOrigin::Stock), 2, "{}", node.product_id);
        }

        let closed = reader
            .groups
            .iter()
            .filter(|g| g.status == AssemblyStatus::FulfilledByStock)
            .count();
        assert_eq!(closed, 4);
        assert_eq!(reader.movements.len(), 1);
        assert_eq!(reader.movements[0].kind, MovementKind::Debit);
        assert_eq!(reader.movements[0].quantity, 2);
    }

    #[test]
    fn redelivered_usage_is_applied_once() {
        let mut reader = MemoryReader::default();
        let order_id = five_kits(&mut reader);
        let event = ProductionEvent::StockUsed(usage(order_id, "kit3", ProductType::Kit, HierarchyLevel::Root, 2));
        let record = ProductionEventRecord::new(&event, None, Utc::now()).unwrap();

        let first = handle(&record, &mut reader, WorkflowPolicy::default(), Utc::now()).unwrap();
        reader.apply(&first);
        let second = handle(&record, &mut reader, WorkflowPolicy::default(), Utc::now()).unwrap();
        assert!(second.is_noop());
        assert_eq!(reader.batches.len(), 2);
    }

    #[test]
    fn stock_for_every_kit_completes_the_order() {
        let mut reader = MemoryReader::default();
        let order_id = five_kits(&mut reader);
        reader
            .run(&ProductionEvent::StockUsed(usage(order_id, "kit3", ProductType::Kit, HierarchyLevel::Root, 5)))
            .unwrap();

        assert!(reader.batches.iter().all(|b| b.status == BatchStatus::CompletedByStock));
        assert_eq!(reader.orders[&order_id].status, OrderStatus::AwaitingPackaging);
    }

    #[test]
    fn nested_piece_credits_its_model() {
        let mut reader = MemoryReader::default();
        catalog(&mut reader, &[("piece9", ProductType::Piece), ("model5", ProductType::Model)]);
        stock(&mut reader, "A-01", "piece9", ProductType::Piece, 4);
        let order_id = seeded(
            &mut reader,
            vec![model_node("model5", 1, vec![piece_node("piece9", 2, PieceKind::Simple, Some(5))])],
        );

        let mut event = usage(order_id, "piece9", ProductType::Piece, HierarchyLevel::Nested, 1);
        event.parent_product_id = Some(pid("model5"));
        reader.run(&ProductionEvent::StockUsed(event)).unwrap();

        let model = reader.group(GroupKind::Model)[0];
        assert_eq!(model.status, AssemblyStatus::InAssembly);
        assert_eq!(model.required_pieces[0].ledger.fulfilled_by(FulfillmentOrigin::Stock), 1);

        let remainder = reader.batches.iter().find(|b| b.split_from.is_none()).unwrap();
        assert_eq!(remainder.quantity_to_produce, 1);
        let remainder_id = remainder.id;
        reader
            .run_chain(ProductionEvent::ProductionCompleted(BatchRef { batch_id: remainder_id }))
            .unwrap();
        assert_eq!(reader.group(GroupKind::Model)[0].status, AssemblyStatus::ReadyForAssembly);
    }

    #[test]
    fn nested_model_closes_its_group_and_credits_the_kit() {
        let mut reader = MemoryReader::default();
        catalog(&mut reader, &[("model5", ProductType::Model), ("kit3", ProductType::Kit)]);
        stock(&mut reader, "A-01", "model5", ProductType::Model, 3);
        let order_id = seeded(
            &mut reader,
            vec![kit_node(
                "kit3",
                1,
                vec![model_node("model5", 2, vec![piece_node("piece9", 1, PieceKind::Simple, None)])],
            )],
        );

        let mut event = usage(order_id, "model5", ProductType::Model, HierarchyLevel::Nested, 2);
        event.parent_product_id = Some(pid("kit3"));
        reader.run(&ProductionEvent::StockUsed(event)).unwrap();

        assert!(reader
            .group(GroupKind::Model)
            .iter()
            .all(|g| g.status == AssemblyStatus::FulfilledByStock));
        let kit = reader.group(GroupKind::Kit)[0];
        assert_eq!(kit.status, AssemblyStatus::ReadyForAssembly);
        assert!(reader.batches.iter().all(|b| b.status == BatchStatus::CompletedByStock));
    }

    #[test]
    fn fully_covered_batch_in_production_is_kept() {
        let mut reader = MemoryReader::default();
        catalog(&mut reader, &[("piece9", ProductType::Piece)]);
        stock(&mut reader, "A-01", "piece9", ProductType::Piece, 5);
        let order_id = seeded(&mut reader, vec![piece_node("piece9", 2, PieceKind::Simple, Some(5))]);
        let batch_id = reader.batches[0].id;
        reader
            .run(&ProductionEvent::ProductionStarted(BatchRef { batch_id }))
            .unwrap();

        reader
            .run(&ProductionEvent::StockUsed(usage(order_id, "piece9", ProductType::Piece, HierarchyLevel::Root, 2)))
            .unwrap();
        assert_eq!(reader.batches.len(), 1);
        assert_eq!(reader.batches[0].status, BatchStatus::FulfilledByStock);
    }

    #[test]
    fn insufficient_stock_aborts_without_writes() {
        let mut reader = MemoryReader::default();
        let order_id = five_kits(&mut reader);
        stock(&mut reader, "A-01", "kit3", ProductType::Kit, 1);
        let before = reader.groups.clone();

        let err = reader
            .run(&ProductionEvent::StockUsed(usage(order_id, "kit3", ProductType::Kit, HierarchyLevel::Root, 2)))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Domain(_)));
        assert_eq!(reader.groups, before);
        assert!(reader.movements.is_empty());
    }

    #[test]
    fn successive_usages_cannot_overdraw_a_position() {
        let mut reader = MemoryReader::default();
        let order_id = five_kits(&mut reader);
        stock(&mut reader, "A-01", "kit3", ProductType::Kit, 2);
        let kit_usage = || ProductionEvent::StockUsed(usage(order_id, "kit3", ProductType::Kit, HierarchyLevel::Root, 2));

        reader.run(&kit_usage()).unwrap();
        let position = &reader.positions[&StockPositionId::new("A-01").unwrap()];
        assert_eq!(position.quantity, 0);

        let err = reader.run(&kit_usage()).unwrap_err();
        assert!(matches!(err, WorkflowError::Domain(fabline_core::DomainError::InvariantViolation(_))));
        assert_eq!(reader.movements.len(), 1);
        assert_eq!(reader.positions[&StockPositionId::new("A-01").unwrap()].quantity, 0);
    }

    #[test]
    fn unresolvable_payloads_are_rejected() {
        let mut reader = MemoryReader::default();
        let order_id = five_kits(&mut reader);

        let unknown = usage(order_id, "kit9", ProductType::Kit, HierarchyLevel::Root, 1);
        assert!(reader.run(&ProductionEvent::StockUsed(unknown)).unwrap_err().is_validation());

        let nested_kit = usage(order_id, "kit3", ProductType::Kit, HierarchyLevel::Nested, 1);
        assert!(reader.run(&ProductionEvent::StockUsed(nested_kit)).unwrap_err().is_validation());

        let mut too_many = usage(order_id, "kit3", ProductType::Kit, HierarchyLevel::Root, 6);
        too_many.stock_positions[0].quantity = 6;
        assert!(reader.run(&ProductionEvent::StockUsed(too_many)).unwrap_err().is_validation());
    }

    #[test]
    fn named_instances_must_match_the_quantity() {
        let mut reader = MemoryReader::default();
        let order_id = five_kits(&mut reader);
        let kit_ids: Vec<AssemblyInstanceId> = reader
            .group(GroupKind::Kit)
            .iter()
            .filter_map(|g| g.instance_id().cloned())
            .collect();

        let mut event = usage(order_id, "kit3", ProductType::Kit, HierarchyLevel::Root, 2);
        event.assembly_instance_ids = vec![kit_ids[0].clone()];
        assert!(reader.run(&ProductionEvent::StockUsed(event.clone())).unwrap_err().is_validation());

        event.assembly_instance_ids = vec![kit_ids[3].clone(), kit_ids[4].clone()];
        reader.run(&ProductionEvent::StockUsed(event)).unwrap();
        let closed: Vec<_> = reader
            .group(GroupKind::Kit)
            .into_iter()
            .filter(|g| g.status == AssemblyStatus::FulfilledByStock)
            .filter_map(|g| g.instance_id().cloned())
            .collect();
        assert_eq!(closed.len(), 2);
        assert!(closed.contains(&kit_ids[3]) && closed.contains(&kit_ids[4]));
    }

    #[test]
    fn classification_covers_every_valid_pair() {
        use HierarchyLevel::{Nested, Root};
        assert_eq!(ReconciliationTarget::classify(Root, ProductType::Kit), Some(ReconciliationTarget::KitRoot));
        assert_eq!(ReconciliationTarget::classify(Nested, ProductType::Model), Some(ReconciliationTarget::ModelNested));
        assert_eq!(ReconciliationTarget::classify(Nested, ProductType::Piece), Some(ReconciliationTarget::PieceNested));
        assert_eq!(ReconciliationTarget::classify(Nested, ProductType::Kit), None);
        assert_eq!(ReconciliationTarget::classify(Root, ProductType::Part), None);
    }
}
