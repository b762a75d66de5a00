//! `criacao_pedido`: explode the order and consolidate its print demand.

use tracing::{debug, info};

use fabline_core::BatchId;
use fabline_orders::{Order, OrderStatus};

use crate::batch::ProductionBatch;
use crate::consolidation::{consolidatable_keys, consolidate};
use crate::error::{WorkflowError, WorkflowResult};
use crate::event::OrderRef;
use crate::explosion::{Explosion, explode};

use super::{Context, Decision, WorkflowReader};

pub(crate) fn on_order_created(
    ctx: &Context,
    payload: OrderRef,
    reader: &mut dyn WorkflowReader,
) -> WorkflowResult<Decision> {
    let order = reader
        .order(payload.order_id)?
        .ok_or_else(|| WorkflowError::missing("order", payload.order_id))?;

    if !order.is_received() {
        debug!(order_id = %order.id, status = ?order.status, "order already exploded");
        return Ok(Decision::noop());
    }

    let explosion = explode(&order, ctx.now)?;
    let keys = consolidatable_keys(&explosion.demands);
    let open = if keys.is_empty() {
        Vec::new()
    } else {
        reader.open_batches(&keys)?
    };

    Ok(decide(ctx, order, explosion, &open))
}

fn decide(ctx: &Context, mut order: Order, explosion: Explosion, open: &[ProductionBatch]) -> Decision {
    let mut decision = Decision::noop();

    let Explosion {
        instances,
        groups,
        packaging,
        demands,
    } = explosion;
    let plan = consolidate(open, demands, BatchId::new, ctx.now);

    info!(
        order_id = %order.id,
        instances = instances.len(),
        groups = groups.len(),
        batches_created = plan.created.len(),
        batches_updated = plan.updated.len(),
        batches_deleted = plan.deleted.len(),
        "order exploded"
    );

    for group in groups {
        decision.put_group(group);
    }
    decision.put_group(packaging);
    for batch in plan.updated.into_iter().chain(plan.created) {
        decision.put_batch(batch);
    }
    for id in plan.deleted {
        decision.delete_batch(id);
    }

    order.advance(OrderStatus::InProduction, ctx.now);
    decision.put_order(order);
    decision
}
