//! Component arrivals and assembly completions for piece, model and kit groups.

use tracing::{debug, info, warn};

use fabline_catalog::ProductType;
use fabline_core::{Lifecycle, ProductId};

use crate::error::{WorkflowError, WorkflowResult};
use crate::event::{AssemblyCompletion, ComponentArrival, PartsArrival};
use crate::group::{AssemblyGroup, AssemblyStatus, ComponentList, Credit, CreditOutcome, FulfillmentOrigin, GroupKind};
use crate::identifier::AssemblyInstanceId;

use super::{Context, Decision, EdgeDecision, WorkflowReader, route_finished};

/// `entrada_parte_montagem_peca`.
pub(crate) fn on_parts_arrival(
    ctx: &Context,
    payload: PartsArrival,
    reader: &mut dyn WorkflowReader,
) -> WorkflowResult<Decision> {
    let Some(group) = reader.group_for_instance(payload.order_id, &payload.assembly_instance_id)? else {
        warn!(
            order_id = %payload.order_id,
            instance_id = %payload.assembly_instance_id,
            "no piece assembly group for instance; skipping"
        );
        return Ok(Decision::skip(format!(
            "no assembly group for {}",
            payload.assembly_instance_id
        )));
    };
    expect_kind(&group, GroupKind::Piece, "entrada_parte_montagem_peca")?;

    let lines: Vec<(ProductId, u32)> = payload
        .parts
        .into_iter()
        .map(|p| (p.part_id, p.quantity))
        .collect();
    Ok(credit_components(ctx, group, ComponentList::Parts, lines, Vec::new()))
}

/// `entrada_peca_montagem_modelo`, `entrada_peca_montagem_kit`, `entrada_modelo_montagem_kit`.
pub(crate) fn on_component_arrival(
    ctx: &Context,
    kind: GroupKind,
    list: ComponentList,
    payload: ComponentArrival,
    reader: &mut dyn WorkflowReader,
) -> WorkflowResult<Decision> {
    let expected_type = match list {
        ComponentList::Parts => ProductType::Part,
        ComponentList::Pieces => ProductType::Piece,
        ComponentList::Models => ProductType::Model,
    };
    if payload.product_type != expected_type {
        return Err(WorkflowError::validation(
            "component arrival",
            format!("expected a {expected_type}, got a {}", payload.product_type),
        ));
    }

    let Some(group) = reader.group_for_instance(payload.order_id, &payload.target_instance_id)? else {
        warn!(
            order_id = %payload.order_id,
            instance_id = %payload.target_instance_id,
            "no assembly group for target instance; skipping"
        );
        return Ok(Decision::skip(format!(
            "no assembly group for {}",
            payload.target_instance_id
        )));
    };
    expect_kind(&group, kind, "component arrival")?;

    let instances: Vec<AssemblyInstanceId> = payload.component_instance_id.into_iter().collect();
    Ok(credit_components(
        ctx,
        group,
        list,
        vec![(payload.product_id, payload.quantity)],
        instances,
    ))
}

fn expect_kind(group: &AssemblyGroup, kind: GroupKind, event: &str) -> WorkflowResult<()> {
    if group.kind != kind {
        return Err(WorkflowError::validation(
            event,
            format!("group {} is a {:?} group, expected {:?}", group.id, group.kind, kind),
        ));
    }
    Ok(())
}

fn credit_components(
    ctx: &Context,
    mut group: AssemblyGroup,
    list: ComponentList,
    lines: Vec<(ProductId, u32)>,
    instance_ids: Vec<AssemblyInstanceId>,
) -> Decision {
    if group.has_event(ctx.event_id) {
        debug!(group_id = %group.id, event_id = %ctx.event_id, "arrival already recorded");
        return Decision::noop();
    }
    if group.status.is_terminal() || group.status.rank() >= AssemblyStatus::Assembled.rank() {
        debug!(group_id = %group.id, status = ?group.status, "group past assembly; ignoring arrival");
        return Decision::noop();
    }

    let credit = Credit::new(FulfillmentOrigin::Production, ctx.event_id, ctx.now);
    let mut credited = 0;
    for (product_id, quantity) in lines {
        match group.credit_component(list, &product_id, credit, quantity, instance_ids.clone()) {
            CreditOutcome::Credited(n) => credited += n,
            CreditOutcome::AlreadySatisfied => {
                debug!(group_id = %group.id, product_id = %product_id, "component already satisfied")
            }
            CreditOutcome::NotRequired => {
                warn!(group_id = %group.id, product_id = %product_id, "group does not require this component")
            }
            CreditOutcome::Duplicate => {}
        }
    }
    if credited == 0 {
        return Decision::noop();
    }

    let transition = group.refresh_status(ctx.now);
    info!(
        group_id = %group.id,
        credited,
        status = ?group.status,
        ready = transition.is_applied() && group.status == AssemblyStatus::ReadyForAssembly,
        "components received"
    );
    let mut decision = Decision::noop();
    decision.put_group(group);
    decision
}

/// `conclusao_montagem_peca`, `conclusao_montagem_modelo`, `conclusao_montagem_kit`.
pub(crate) fn on_assembly_completed(
    ctx: &Context,
    kind: GroupKind,
    payload: AssemblyCompletion,
    reader: &mut dyn WorkflowReader,
) -> WorkflowResult<Decision> {
    let Some(group) = reader.assembly_group(payload.assembly_group_id)? else {
        warn!(group_id = %payload.assembly_group_id, "assembly completed for unknown group; skipping");
        return Ok(Decision::skip(format!(
            "assembly group {} not found",
            payload.assembly_group_id
        )));
    };
    expect_kind(&group, kind, "assembly completion")?;
    decide_completion(ctx, group, payload)
}

fn decide_completion(
    ctx: &Context,
    mut group: AssemblyGroup,
    payload: AssemblyCompletion,
) -> WorkflowResult<Decision> {
    if group.status.is_terminal() || group.status.rank() >= AssemblyStatus::Assembled.rank() {
        debug!(group_id = %group.id, status = ?group.status, "assembly already completed");
        return Ok(Decision::noop());
    }
    if group.status != AssemblyStatus::ReadyForAssembly {
        warn!(group_id = %group.id, status = ?group.status, "components still outstanding; ignoring completion");
        return Ok(Decision::skip(format!("group {} is not ready for assembly", group.id)));
    }
    let Some(target) = group.target.clone() else {
        return Err(WorkflowError::validation(
            "assembly completion",
            format!("group {} has no target instance", group.id),
        ));
    };

    group.advance(AssemblyStatus::Assembled, ctx.now);
    let mut decision = Decision::noop();

    if group.kind == GroupKind::Piece && ctx.policy.piece_assembly_forwarding == EdgeDecision::Unresolved {
        warn!(
            group_id = %group.id,
            instance_id = %target.instance_id,
            "piece assembly forwarding is unresolved; marked assembled without emitting"
        );
    } else {
        match route_finished(group.order_id, &target.instance, 1, Some(group.id), payload.destinations) {
            Some(event) => decision.emit(event),
            None => warn!(group_id = %group.id, "no destination for assembled unit"),
        }
    }

    info!(group_id = %group.id, kind = ?group.kind, "assembly completed");
    decision.put_group(group);
    Ok(decision)
}
