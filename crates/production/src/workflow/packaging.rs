//! Packaging arrivals, stock/order routing of finished units, order completion.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use fabline_catalog::ProductType;
use fabline_core::{Lifecycle, OrderId, ProductId};
use fabline_inventory::StockMovement;
use fabline_orders::{Order, OrderStatus};

use crate::error::{WorkflowError, WorkflowResult};
use crate::event::{
    Destination, OrderCompletion, OrderTransfer, PackagingArrival, ProductionEvent, StockEntry,
};
use crate::explosion::instances_of;
use crate::group::{AssemblyGroup, AssemblyStatus, Credit, FulfillmentOrigin, PackagingRecord};
use crate::identifier::AssemblyInstanceId;

use super::{Context, Decision, WorkflowReader};

/// Move the order to awaiting-packaging once its packaging group is complete.
///
/// Returns whether the order changed.
pub(crate) fn settle_packaging(ctx: &Context, packaging: &mut AssemblyGroup, order: &mut Order) -> bool {
    packaging.refresh_status(ctx.now);
    if packaging.status != AssemblyStatus::ProducedAwaitingPackaging {
        return false;
    }
    let applied = order.advance(OrderStatus::AwaitingPackaging, ctx.now).is_applied();
    if applied {
        info!(order_id = %order.id, "all final products present; awaiting packaging");
    }
    applied
}

/// `entrada_{kit,modelo,peca}_embalagem`.
pub(crate) fn on_packaging_arrival(
    ctx: &Context,
    product_type: ProductType,
    payload: PackagingArrival,
    reader: &mut dyn WorkflowReader,
) -> WorkflowResult<Decision> {
    let Some(packaging) = reader.packaging_group(payload.order_id)? else {
        warn!(order_id = %payload.order_id, "no packaging group for order; skipping arrival");
        return Ok(Decision::skip(format!("no packaging group for order {}", payload.order_id)));
    };
    let order = reader
        .order(payload.order_id)?
        .ok_or_else(|| WorkflowError::missing("order", payload.order_id))?;
    let source = match payload.source_group_id {
        Some(id) => reader.assembly_group(id)?,
        None => None,
    };
    // Instance-level credit needs the instance's descendants; only re-derive
    // them when the arrival names an instance.
    let covered = match &payload.assembly_instance_id {
        Some(id) => Some(covered_by(&order, id)?),
        None => None,
    };

    Ok(decide_arrival(ctx, product_type, payload, packaging, order, source, covered))
}

/// `instance_id` plus every instance nested under it.
pub(crate) fn covered_by(
    order: &Order,
    instance_id: &AssemblyInstanceId,
) -> WorkflowResult<HashSet<AssemblyInstanceId>> {
    let instances = instances_of(order)?;
    let Some(root) = instances.iter().find(|i| &i.id == instance_id) else {
        return Ok(HashSet::new());
    };
    Ok(instances
        .iter()
        .filter(|i| i.path.is_self_or_descendant_of(&root.path))
        .map(|i| i.id.clone())
        .collect())
}

fn decide_arrival(
    ctx: &Context,
    product_type: ProductType,
    payload: PackagingArrival,
    mut packaging: AssemblyGroup,
    mut order: Order,
    source: Option<AssemblyGroup>,
    covered: Option<HashSet<AssemblyInstanceId>>,
) -> Decision {
    if packaging.has_event(ctx.event_id) || packaging.status == AssemblyStatus::Packaged {
        debug!(group_id = %packaging.id, event_id = %ctx.event_id, "packaging arrival already applied");
        return Decision::noop();
    }

    let credit = Credit::new(FulfillmentOrigin::Production, ctx.event_id, ctx.now);
    let Some(entry) = packaging.final_product_mut(&payload.product_id, product_type) else {
        warn!(
            order_id = %order.id,
            product_id = %payload.product_id,
            "product is not a final product of this order; skipping"
        );
        return Decision::skip(format!("{} is not ordered by {}", payload.product_id, order.id));
    };

    let credited = match (&payload.assembly_instance_id, covered) {
        (Some(id), Some(covered)) if entry.instance_ids.contains(id) => entry.credit_subtree(credit, &covered),
        _ => entry.credit_quantity(credit, payload.quantity),
    };

    let mut decision = Decision::noop();
    if credited > 0 {
        let order_changed = settle_packaging(ctx, &mut packaging, &mut order);
        info!(
            order_id = %order.id,
            product_id = %payload.product_id,
            credited,
            status = ?packaging.status,
            "final product received"
        );
        decision.put_group(packaging);
        if order_changed {
            decision.put_order(order.clone());
        }
    } else {
        debug!(order_id = %order.id, product_id = %payload.product_id, "final product already covered");
    }

    if let Some(mut group) = source {
        if group.advance(AssemblyStatus::ProducedAwaitingPackaging, ctx.now).is_applied() {
            decision.put_group(group);
        }
    }

    for destination in payload.destinations {
        if let Some(event) = route_destination(order.id, product_type, &payload.product_id, destination) {
            decision.emit(event);
        }
    }
    decision
}

fn route_destination(
    source_order_id: OrderId,
    product_type: ProductType,
    product_id: &ProductId,
    destination: Destination,
) -> Option<ProductionEvent> {
    match destination {
        Destination::Stock { quantity, location_id } => ProductionEvent::into_stock(
            product_type,
            StockEntry {
                product_id: product_id.clone(),
                quantity,
                location_id,
                source_order_id: Some(source_order_id),
            },
        ),
        Destination::Order { quantity, order_id } => ProductionEvent::into_order(
            product_type,
            OrderTransfer {
                source_order_id,
                target_order_id: order_id,
                product_id: product_id.clone(),
                quantity,
            },
        ),
    }
}

/// `entrada_estoque_{kit,modelo,peca}`: credit finished units to stock.
pub(crate) fn on_stock_entry(ctx: &Context, product_type: ProductType, payload: StockEntry) -> Decision {
    info!(
        product_id = %payload.product_id,
        quantity = payload.quantity,
        "finished units routed to stock"
    );
    let mut decision = Decision::noop();
    decision.append_movement(StockMovement::credit(
        payload.location_id,
        payload.product_id,
        product_type,
        u64::from(payload.quantity),
        payload.source_order_id,
        ctx.event_id,
        ctx.now,
    ));
    decision
}

/// `entrada_pedido_{kit,modelo,peca}`: finished units fulfilling another order.
pub(crate) fn on_order_transfer(
    ctx: &Context,
    product_type: ProductType,
    payload: OrderTransfer,
    reader: &mut dyn WorkflowReader,
) -> WorkflowResult<Decision> {
    let target = payload.target_order_id;
    let (Some(mut packaging), Some(mut order)) = (reader.packaging_group(target)?, reader.order(target)?) else {
        warn!(order_id = %target, "transfer target order not found; skipping");
        return Ok(Decision::skip(format!("target order {target} not found")));
    };

    if packaging.has_event(ctx.event_id) || packaging.status.is_terminal() {
        debug!(order_id = %target, "transfer already applied");
        return Ok(Decision::noop());
    }

    let credit = Credit::new(
        FulfillmentOrigin::Transfer {
            from_order: payload.source_order_id,
        },
        ctx.event_id,
        ctx.now,
    );
    let Some(entry) = packaging.final_product_mut(&payload.product_id, product_type) else {
        warn!(order_id = %target, product_id = %payload.product_id, "target order does not need this product");
        return Ok(Decision::skip(format!("{} is not ordered by {target}", payload.product_id)));
    };
    let credited = entry.credit_quantity(credit, payload.quantity);
    if credited == 0 {
        warn!(order_id = %target, product_id = %payload.product_id, "target requirement already met");
        return Ok(Decision::noop());
    }
    if credited < payload.quantity {
        warn!(
            order_id = %target,
            surplus = payload.quantity - credited,
            "transfer exceeds the target requirement"
        );
    }

    let order_changed = settle_packaging(ctx, &mut packaging, &mut order);
    info!(
        source_order_id = %payload.source_order_id,
        order_id = %target,
        credited,
        "units transferred between orders"
    );
    let mut decision = Decision::noop();
    decision.put_group(packaging);
    if order_changed {
        decision.put_order(order);
    }
    Ok(decision)
}

/// `conclusao_pedido`: close the order and record packaging.
pub(crate) fn on_order_completed(
    ctx: &Context,
    payload: OrderCompletion,
    reader: &mut dyn WorkflowReader,
) -> WorkflowResult<Decision> {
    let order = reader
        .order(payload.order_id)?
        .ok_or_else(|| WorkflowError::missing("order", payload.order_id))?;
    let packaging = reader.packaging_group(payload.order_id)?;
    Ok(decide_completion(ctx, payload, order, packaging))
}

fn decide_completion(
    ctx: &Context,
    payload: OrderCompletion,
    mut order: Order,
    packaging: Option<AssemblyGroup>,
) -> Decision {
    match order.status {
        OrderStatus::Completed => {
            debug!(order_id = %order.id, "order already completed");
            return Decision::noop();
        }
        OrderStatus::AwaitingPackaging => {}
        other => {
            warn!(order_id = %order.id, status = ?other, "order is not awaiting packaging; ignoring completion");
            return Decision::skip(format!("order {} is not awaiting packaging", order.id));
        }
    }

    let mut decision = Decision::noop();
    order.advance(OrderStatus::Completed, ctx.now);

    match packaging {
        Some(mut group) => {
            group.packaging = Some(PackagingRecord {
                minutes: payload.packaging_minutes,
                consumables: payload.consumables.clone(),
                event_id: ctx.event_id,
                recorded_at: ctx.now,
            });
            group.advance(AssemblyStatus::Packaged, ctx.now);
            decision.put_group(group);
        }
        None => warn!(order_id = %order.id, "order has no packaging group to close"),
    }

    for item in payload.consumables {
        decision.append_movement(StockMovement::packaging_consumption(
            item.id,
            item.quantity,
            order.id,
            ctx.event_id,
            ctx.now,
        ));
    }

    info!(order_id = %order.id, minutes = payload.packaging_minutes, "order completed");
    decision.put_order(order);
    decision
}
