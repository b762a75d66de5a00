//! Production batches: consolidated, capped-size print jobs.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fabline_catalog::{ItemQuantity, PieceKind, PrintJob};
use fabline_core::{BatchId, Entity, Lifecycle, OrderId, ProductId, Transition};

use crate::identifier::{AssemblyInstanceId, InstancePath};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    #[serde(rename = "aguardando")]
    Waiting,
    #[serde(rename = "em_producao")]
    InProduction,
    #[serde(rename = "produzido")]
    Produced,
    /// Split off by reconciliation: the units it holds came from stock.
    #[serde(rename = "concluido_por_estoque")]
    CompletedByStock,
    /// Was already printing when stock covered all of it.
    #[serde(rename = "atendido_por_estoque")]
    FulfilledByStock,
}

impl Lifecycle for BatchStatus {
    fn rank(self) -> u8 {
        match self {
            BatchStatus::Waiting => 0,
            BatchStatus::InProduction => 1,
            BatchStatus::Produced | BatchStatus::CompletedByStock | BatchStatus::FulfilledByStock => 2,
        }
    }

    fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

/// What a finished batch yields for each unit it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobRole {
    /// The print is the finished piece.
    #[serde(rename = "peca")]
    WholePiece,
    /// The print yields parts of a multi-print piece, which still needs assembly.
    #[serde(rename = "parte_de_peca")]
    PieceComponent,
}

impl JobRole {
    pub fn for_piece(kind: PieceKind) -> Self {
        if kind.requires_assembly() {
            JobRole::PieceComponent
        } else {
            JobRole::WholePiece
        }
    }
}

/// Fingerprint of fungible print jobs.
///
/// Sorted `(id, name)` pairs of parts, filaments and supplies plus the piece
/// subtype. Quantities are deliberately excluded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositionKey {
    parts: Vec<(ProductId, String)>,
    filaments: Vec<(ProductId, String)>,
    supplies: Vec<(ProductId, String)>,
    piece_kind: PieceKind,
}

impl CompositionKey {
    pub fn of(job: &PrintJob, piece_kind: PieceKind) -> Self {
        fn sorted(items: &[ItemQuantity]) -> Vec<(ProductId, String)> {
            let mut pairs: Vec<_> = items.iter().map(|i| (i.id.clone(), i.name.clone())).collect();
            pairs.sort();
            pairs
        }
        Self {
            parts: sorted(&job.parts),
            filaments: sorted(&job.filaments),
            supplies: sorted(&job.supplies),
            piece_kind,
        }
    }

    /// Stable string form stored on batches and used in queries.
    pub fn fingerprint(&self) -> String {
        let render = |pairs: &[(ProductId, String)]| {
            pairs
                .iter()
                .map(|(id, name)| format!("{:?}:{:?}", id.as_str(), name))
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            "parts[{}]|filaments[{}]|supplies[{}]|{}",
            render(&self.parts),
            render(&self.filaments),
            render(&self.supplies),
            self.piece_kind.label()
        )
    }
}

/// Units of a batch reserved for one assembly instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceAllocation {
    pub instance_id: AssemblyInstanceId,
    pub instance: InstancePath,
    pub units: u32,
}

/// An order a batch serves and the instances it serves there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginOrder {
    pub order_id: OrderId,
    pub order_number: u64,
    pub allocations: Vec<InstanceAllocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionBatch {
    pub id: BatchId,
    pub composition_key: String,
    pub piece_kind: PieceKind,
    pub role: JobRole,
    /// Totals for this batch.
    pub parts: Vec<ItemQuantity>,
    pub filaments: Vec<ItemQuantity>,
    pub supplies: Vec<ItemQuantity>,
    /// Parts yielded per unit, used when routing finished units.
    pub unit_parts: Vec<ItemQuantity>,
    pub print_minutes: u64,
    pub max_batch_size: Option<u32>,
    /// Units across the whole consolidation this batch was split from.
    pub original_total_quantity: u32,
    /// Units assigned to this split when it was consolidated.
    pub original_quantity: u32,
    pub quantity_to_produce: u32,
    pub origin_orders: Vec<OriginOrder>,
    /// Denormalized for membership queries.
    #[serde(default)]
    pub instance_ids: Vec<AssemblyInstanceId>,
    #[serde(default)]
    pub order_ids: Vec<OrderId>,
    pub status: BatchStatus,
    #[serde(default)]
    pub split_from: Option<BatchId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProductionBatch {
    /// Batches capped at exactly one unit never merge.
    pub fn is_consolidatable(&self) -> bool {
        self.max_batch_size != Some(1)
    }

    pub fn is_open(&self) -> bool {
        self.status == BatchStatus::Waiting
    }

    pub fn allocated_units(&self) -> u32 {
        self.allocations().map(|(_, _, a)| a.units).sum()
    }

    pub fn allocations(&self) -> impl Iterator<Item = (OrderId, u64, &InstanceAllocation)> {
        self.origin_orders
            .iter()
            .flat_map(|o| o.allocations.iter().map(move |a| (o.order_id, o.order_number, a)))
    }

    pub fn serves(&self, instance_id: &AssemblyInstanceId) -> bool {
        self.allocations().any(|(_, _, a)| &a.instance_id == instance_id)
    }

    /// Recompute the denormalized query fields from `origin_orders`.
    pub fn reindex(&mut self) {
        self.origin_orders.retain(|o| !o.allocations.is_empty());
        self.instance_ids = self.allocations().map(|(_, _, a)| a.instance_id.clone()).collect();
        self.instance_ids.dedup();
        self.order_ids = self.origin_orders.iter().map(|o| o.order_id).collect();
    }

    pub fn advance(&mut self, next: BatchStatus, at: DateTime<Utc>) -> Transition<BatchStatus> {
        let transition = self.status.advance(next);
        if transition.is_applied() {
            self.updated_at = Some(at);
            if next == BatchStatus::InProduction {
                self.started_at = Some(at);
            }
            if next.is_terminal() {
                self.finished_at = Some(at);
            }
        }
        transition
    }

    /// Split off the units serving `covered` instances, now satisfied by stock.
    ///
    /// Returns `None` when the batch is terminal or serves none of them.
    /// Material for the units still to produce is rounded up; the stock share
    /// takes the exact complement, so the two halves always sum to the
    /// original totals.
    pub fn split_for_stock(
        &self,
        covered: &HashSet<AssemblyInstanceId>,
        new_id: BatchId,
        at: DateTime<Utc>,
    ) -> Option<StockSplit> {
        if self.status.is_terminal() {
            return None;
        }
        let covered_units: u32 = self
            .allocations()
            .filter(|(_, _, a)| covered.contains(&a.instance_id))
            .map(|(_, _, a)| a.units)
            .sum();
        if covered_units == 0 {
            return None;
        }

        let total = self.quantity_to_produce.max(self.allocated_units());
        let remaining_units = total.saturating_sub(covered_units);

        if remaining_units == 0 && self.status == BatchStatus::InProduction {
            let mut fulfilled = self.clone();
            fulfilled.advance(BatchStatus::FulfilledByStock, at);
            return Some(StockSplit {
                remainder: Remainder::Keep(fulfilled),
                stock_batch: None,
            });
        }

        let (kept_orders, stock_orders) = partition_origins(&self.origin_orders, covered);

        let mut stock_batch = self.clone();
        stock_batch.id = new_id;
        stock_batch.split_from = Some(self.id);
        stock_batch.origin_orders = stock_orders;
        stock_batch.quantity_to_produce = covered_units;
        stock_batch.original_quantity = covered_units;
        stock_batch.created_at = at;
        stock_batch.updated_at = None;
        stock_batch.started_at = None;
        stock_batch.finished_at = None;
        stock_batch.status = BatchStatus::Waiting;

        let mut kept = self.clone();
        kept.origin_orders = kept_orders;
        kept.quantity_to_produce = remaining_units;
        kept.updated_at = Some(at);

        kept.parts = scale_items(&self.parts, remaining_units, total);
        kept.filaments = scale_items(&self.filaments, remaining_units, total);
        kept.supplies = scale_items(&self.supplies, remaining_units, total);
        kept.print_minutes = ceil_share(self.print_minutes, remaining_units, total);

        stock_batch.parts = complement(&self.parts, &kept.parts);
        stock_batch.filaments = complement(&self.filaments, &kept.filaments);
        stock_batch.supplies = complement(&self.supplies, &kept.supplies);
        stock_batch.print_minutes = self.print_minutes.saturating_sub(kept.print_minutes);
        stock_batch.reindex();
        stock_batch.advance(BatchStatus::CompletedByStock, at);

        kept.reindex();
        let remainder = if remaining_units == 0 {
            Remainder::Delete(self.id)
        } else {
            Remainder::Keep(kept)
        };

        Some(StockSplit {
            remainder,
            stock_batch: Some(stock_batch),
        })
    }
}

impl Entity for ProductionBatch {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// What happens to the original batch after a stock split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remainder {
    Keep(ProductionBatch),
    /// Waiting batch fully covered by stock.
    Delete(BatchId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockSplit {
    pub remainder: Remainder,
    pub stock_batch: Option<ProductionBatch>,
}

fn partition_origins(
    origins: &[OriginOrder],
    covered: &HashSet<AssemblyInstanceId>,
) -> (Vec<OriginOrder>, Vec<OriginOrder>) {
    let mut kept = Vec::new();
    let mut taken = Vec::new();
    for origin in origins {
        let (in_stock, still_needed): (Vec<_>, Vec<_>) = origin
            .allocations
            .iter()
            .cloned()
            .partition(|a| covered.contains(&a.instance_id));
        let with = |allocations| OriginOrder {
            order_id: origin.order_id,
            order_number: origin.order_number,
            allocations,
        };
        if !still_needed.is_empty() {
            kept.push(with(still_needed));
        }
        if !in_stock.is_empty() {
            taken.push(with(in_stock));
        }
    }
    (kept, taken)
}

/// `ceil(total * part / whole)`; zero when `whole` is zero.
pub(crate) fn ceil_share(total: u64, part: u32, whole: u32) -> u64 {
    if whole == 0 {
        return 0;
    }
    let numerator = u128::from(total) * u128::from(part);
    let whole = u128::from(whole);
    let share = numerator.div_ceil(whole);
    u64::try_from(share).unwrap_or(u64::MAX)
}

pub(crate) fn scale_items(items: &[ItemQuantity], part: u32, whole: u32) -> Vec<ItemQuantity> {
    items
        .iter()
        .map(|i| ItemQuantity::new(i.id.clone(), i.name.clone(), ceil_share(i.quantity, part, whole)))
        .collect()
}

fn complement(total: &[ItemQuantity], kept: &[ItemQuantity]) -> Vec<ItemQuantity> {
    total
        .iter()
        .zip(kept)
        .map(|(t, k)| ItemQuantity::new(t.id.clone(), t.name.clone(), t.quantity.saturating_sub(k.quantity)))
        .collect()
}
