//! `inicio_producao` / `conclusao_producao`: batch lifecycle.

use tracing::{debug, info, warn};

use fabline_core::Lifecycle;

use crate::batch::{BatchStatus, JobRole, ProductionBatch};
use crate::error::WorkflowResult;
use crate::event::{BatchRef, PartQuantity, PartsArrival, ProductionEvent};

use super::{Context, Decision, WorkflowReader, route_finished};

pub(crate) fn on_production_started(
    ctx: &Context,
    payload: BatchRef,
    reader: &mut dyn WorkflowReader,
) -> WorkflowResult<Decision> {
    let Some(mut batch) = reader.batch(payload.batch_id)? else {
        warn!(batch_id = %payload.batch_id, "production started for unknown batch; skipping");
        return Ok(Decision::skip(format!("batch {} not found", payload.batch_id)));
    };

    if !batch.advance(BatchStatus::InProduction, ctx.now).is_applied() {
        debug!(batch_id = %batch.id, status = ?batch.status, "batch already started");
        return Ok(Decision::noop());
    }

    info!(batch_id = %batch.id, units = batch.quantity_to_produce, "batch in production");
    let mut decision = Decision::noop();
    decision.put_batch(batch);
    Ok(decision)
}

pub(crate) fn on_production_completed(
    ctx: &Context,
    payload: BatchRef,
    reader: &mut dyn WorkflowReader,
) -> WorkflowResult<Decision> {
    let Some(batch) = reader.batch(payload.batch_id)? else {
        warn!(batch_id = %payload.batch_id, "production completed for unknown batch; skipping");
        return Ok(Decision::skip(format!("batch {} not found", payload.batch_id)));
    };
    Ok(decide_completion(ctx, batch))
}

fn decide_completion(ctx: &Context, mut batch: ProductionBatch) -> Decision {
    if batch.status.is_terminal() {
        debug!(batch_id = %batch.id, status = ?batch.status, "batch already finished");
        return Decision::noop();
    }
    batch.advance(BatchStatus::Produced, ctx.now);

    let mut decision = Decision::noop();
    for (order_id, _, allocation) in batch.allocations() {
        let next = match batch.role {
            JobRole::PieceComponent => Some(ProductionEvent::PartsIntoPieceAssembly(PartsArrival {
                order_id,
                assembly_instance_id: allocation.instance_id.clone(),
                parts: batch
                    .unit_parts
                    .iter()
                    .map(|p| PartQuantity {
                        part_id: p.id.clone(),
                        quantity: u32::try_from(p.quantity)
                            .unwrap_or(u32::MAX)
                            .saturating_mul(allocation.units),
                    })
                    .collect(),
                batch_id: Some(batch.id),
            })),
            JobRole::WholePiece => route_finished(order_id, &allocation.instance, allocation.units, None, Vec::new()),
        };
        match next {
            Some(event) => decision.emit(event),
            None => warn!(
                batch_id = %batch.id,
                instance_id = %allocation.instance_id,
                "no destination for finished units"
            ),
        }
    }

    info!(batch_id = %batch.id, emitted = decision.emits.len(), "batch produced");
    decision.put_batch(batch);
    decision
}
