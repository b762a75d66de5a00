//! Assembly groups and their fulfillment ledgers.
//!
//! One group exists per instance that needs manual assembly (multi-print
//! pieces, models, kits) plus one packaging group per order. Groups are never
//! deleted; their status only moves forward.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fabline_catalog::{ItemQuantity, ProductType};
use fabline_core::{AssemblyGroupId, Entity, EventId, Lifecycle, OrderId, ProductId, Transition};

use crate::identifier::{AssemblyInstance, AssemblyInstanceId, InstancePath};

/// Assembly group status.
///
/// `FulfilledByStock` is a terminal bypass, reachable only before `Assembled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssemblyStatus {
    #[serde(rename = "aguardando_montagem")]
    AwaitingAssembly,
    #[serde(rename = "em_montagem")]
    InAssembly,
    #[serde(rename = "pronto_para_montagem")]
    ReadyForAssembly,
    #[serde(rename = "montado")]
    Assembled,
    #[serde(rename = "produzido_aguardando_embalagem")]
    ProducedAwaitingPackaging,
    #[serde(rename = "embalado")]
    Packaged,
    #[serde(rename = "concluido_por_estoque")]
    FulfilledByStock,
}

impl Lifecycle for AssemblyStatus {
    fn rank(self) -> u8 {
        match self {
            AssemblyStatus::AwaitingAssembly => 0,
            AssemblyStatus::InAssembly => 1,
            AssemblyStatus::ReadyForAssembly => 2,
            AssemblyStatus::Assembled => 3,
            AssemblyStatus::ProducedAwaitingPackaging => 4,
            AssemblyStatus::Packaged => 5,
            AssemblyStatus::FulfilledByStock => 6,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, AssemblyStatus::Packaged | AssemblyStatus::FulfilledByStock)
    }

    fn permits(self, next: Self) -> bool {
        match next {
            AssemblyStatus::FulfilledByStock => self.rank() < AssemblyStatus::Assembled.rank(),
            _ => !self.is_terminal() && next.rank() > self.rank(),
        }
    }
}

/// What kind of work a group tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupKind {
    #[serde(rename = "peca")]
    Piece,
    #[serde(rename = "modelo")]
    Model,
    #[serde(rename = "kit")]
    Kit,
    #[serde(rename = "embalagem")]
    Packaging,
}

impl GroupKind {
    pub fn for_product(product_type: ProductType) -> Option<Self> {
        match product_type {
            ProductType::Kit => Some(GroupKind::Kit),
            ProductType::Model => Some(GroupKind::Model),
            ProductType::Piece => Some(GroupKind::Piece),
            ProductType::Part => None,
        }
    }
}

/// Where a unit of fulfillment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origem")]
pub enum FulfillmentOrigin {
    #[serde(rename = "producao")]
    Production,
    #[serde(rename = "estoque")]
    Stock,
    #[serde(rename = "pedido")]
    Transfer { from_order: OrderId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub origin: FulfillmentOrigin,
    pub quantity: u32,
    /// Instances this entry covers, when known.
    #[serde(default)]
    pub instance_ids: Vec<AssemblyInstanceId>,
    /// Event that produced the entry; at most one entry per event.
    pub event_id: EventId,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only record of how a requirement was fulfilled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FulfillmentLedger(Vec<LedgerEntry>);

impl FulfillmentLedger {
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fulfilled(&self) -> u32 {
        self.0.iter().map(|e| e.quantity).sum()
    }

    pub fn fulfilled_by(&self, origin: FulfillmentOrigin) -> u32 {
        self.0
            .iter()
            .filter(|e| e.origin == origin)
            .map(|e| e.quantity)
            .sum()
    }

    pub fn contains_event(&self, event_id: EventId) -> bool {
        self.0.iter().any(|e| e.event_id == event_id)
    }

    pub fn covers(&self, instance_id: &AssemblyInstanceId) -> bool {
        self.0.iter().any(|e| e.instance_ids.contains(instance_id))
    }

    fn push(&mut self, entry: LedgerEntry) {
        self.0.push(entry);
    }
}

/// A credit about to be written to a ledger.
#[derive(Debug, Clone, Copy)]
pub struct Credit {
    pub origin: FulfillmentOrigin,
    pub event_id: EventId,
    pub at: DateTime<Utc>,
}

impl Credit {
    pub fn new(origin: FulfillmentOrigin, event_id: EventId, at: DateTime<Utc>) -> Self {
        Self {
            origin,
            event_id,
            at,
        }
    }

    fn entry(&self, quantity: u32, instance_ids: Vec<AssemblyInstanceId>) -> LedgerEntry {
        LedgerEntry {
            origin: self.origin,
            quantity,
            instance_ids,
            event_id: self.event_id,
            recorded_at: self.at,
        }
    }
}

/// Result of crediting a component requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Credited(u32),
    /// The event already has an entry on this ledger.
    Duplicate,
    AlreadySatisfied,
    /// The group has no requirement for that product.
    NotRequired,
}

/// One line of a piece/model/kit group's bill of components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredComponent {
    pub product_id: ProductId,
    pub product_type: ProductType,
    pub name: String,
    pub quantity: u32,
    #[serde(default)]
    pub ledger: FulfillmentLedger,
}

impl RequiredComponent {
    pub fn new(
        product_id: ProductId,
        product_type: ProductType,
        name: impl Into<String>,
        quantity: u32,
    ) -> Self {
        Self {
            product_id,
            product_type,
            name: name.into(),
            quantity,
            ledger: FulfillmentLedger::default(),
        }
    }

    pub fn remaining(&self) -> u32 {
        self.quantity.saturating_sub(self.ledger.fulfilled())
    }

    pub fn is_satisfied(&self) -> bool {
        self.remaining() == 0
    }

    /// Credit up to `quantity` units, capped at what is still missing.
    pub fn credit(
        &mut self,
        credit: Credit,
        quantity: u32,
        instance_ids: Vec<AssemblyInstanceId>,
    ) -> CreditOutcome {
        if self.ledger.contains_event(credit.event_id) {
            return CreditOutcome::Duplicate;
        }
        let amount = quantity.min(self.remaining());
        if amount == 0 {
            return CreditOutcome::AlreadySatisfied;
        }
        self.ledger.push(credit.entry(amount, instance_ids));
        CreditOutcome::Credited(amount)
    }
}

/// A node of the packaging group's required-final-products tree.
///
/// Top-level nodes are what the order ships; nested nodes break each one down
/// to models and pieces so stock can be assigned at any level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredProduct {
    pub product_id: ProductId,
    pub product_type: ProductType,
    pub name: String,
    pub quantity: u32,
    pub instance_ids: Vec<AssemblyInstanceId>,
    #[serde(default)]
    pub ledger: FulfillmentLedger,
    #[serde(default)]
    pub children: Vec<RequiredProduct>,
}

impl RequiredProduct {
    pub fn remaining(&self) -> u32 {
        self.quantity.saturating_sub(self.ledger.fulfilled())
    }

    pub fn is_satisfied(&self) -> bool {
        self.remaining() == 0
    }

    pub fn matches(&self, product_id: &ProductId, product_type: ProductType) -> bool {
        &self.product_id == product_id && self.product_type == product_type
    }

    /// Instances not yet covered by any ledger entry, in tree order.
    pub fn uncovered_instances(&self) -> impl Iterator<Item = &AssemblyInstanceId> {
        self.instance_ids.iter().filter(|id| !self.ledger.covers(id))
    }

    /// Credit by instance: only instances of this node not yet covered count.
    pub fn credit_instances(&mut self, credit: Credit, covered: &HashSet<AssemblyInstanceId>) -> u32 {
        if self.ledger.contains_event(credit.event_id) {
            return 0;
        }
        let ids: Vec<AssemblyInstanceId> = self
            .uncovered_instances()
            .filter(|id| covered.contains(*id))
            .take(self.remaining() as usize)
            .cloned()
            .collect();
        if ids.is_empty() {
            return 0;
        }
        let amount = ids.len() as u32;
        self.ledger.push(credit.entry(amount, ids));
        amount
    }

    /// Credit by quantity, without naming instances.
    pub fn credit_quantity(&mut self, credit: Credit, quantity: u32) -> u32 {
        if self.ledger.contains_event(credit.event_id) {
            return 0;
        }
        let amount = quantity.min(self.remaining());
        if amount > 0 {
            self.ledger.push(credit.entry(amount, Vec::new()));
        }
        amount
    }

    /// Credit this node and every nested node for the instances in `covered`.
    ///
    /// Returns the number of units credited across the subtree.
    pub fn credit_subtree(&mut self, credit: Credit, covered: &HashSet<AssemblyInstanceId>) -> u32 {
        let mut total = self.credit_instances(credit, covered);
        for child in &mut self.children {
            total += child.credit_subtree(credit, covered);
        }
        total
    }

    pub fn contains_event(&self, event_id: EventId) -> bool {
        self.ledger.contains_event(event_id) || self.children.iter().any(|c| c.contains_event(event_id))
    }

    /// Depth-first visit of this node and its descendants with their depth (1 = self).
    pub fn visit<'a>(&'a self, depth: usize, out: &mut Vec<(usize, &'a RequiredProduct)>) {
        out.push((depth, self));
        for child in &self.children {
            child.visit(depth + 1, out);
        }
    }
}

/// Packaging time and consumables recorded when the order is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingRecord {
    pub minutes: u64,
    #[serde(default)]
    pub consumables: Vec<ItemQuantity>,
    pub event_id: EventId,
    pub recorded_at: DateTime<Utc>,
}

/// The instance an assembly group builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyTarget {
    pub product_id: ProductId,
    pub product_type: ProductType,
    pub name: String,
    /// Flat id, kept for equality queries.
    pub instance_id: AssemblyInstanceId,
    pub instance: InstancePath,
}

/// Which component list of a group an arrival credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentList {
    Parts,
    Pieces,
    Models,
}

impl ComponentList {
    pub fn for_product(product_type: ProductType) -> Option<Self> {
        match product_type {
            ProductType::Part => Some(ComponentList::Parts),
            ProductType::Piece => Some(ComponentList::Pieces),
            ProductType::Model => Some(ComponentList::Models),
            ProductType::Kit => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyGroup {
    pub id: AssemblyGroupId,
    pub order_id: OrderId,
    pub order_number: u64,
    pub kind: GroupKind,
    /// `None` for the packaging group.
    #[serde(default)]
    pub target: Option<AssemblyTarget>,
    pub status: AssemblyStatus,
    #[serde(default)]
    pub required_parts: Vec<RequiredComponent>,
    #[serde(default)]
    pub required_pieces: Vec<RequiredComponent>,
    #[serde(default)]
    pub required_models: Vec<RequiredComponent>,
    #[serde(default)]
    pub required_products: Vec<RequiredProduct>,
    #[serde(default)]
    pub packaging: Option<PackagingRecord>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl AssemblyGroup {
    /// Group assembling one piece/model/kit instance.
    pub fn for_instance(
        kind: GroupKind,
        order_number: u64,
        instance: &AssemblyInstance,
        components: Vec<RequiredComponent>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut group = Self {
            id: AssemblyGroupId::new(),
            order_id: instance.path.order_id(),
            order_number,
            kind,
            target: Some(AssemblyTarget {
                product_id: instance.product_id().clone(),
                product_type: instance.product_type(),
                name: instance.name.clone(),
                instance_id: instance.id.clone(),
                instance: instance.path.clone(),
            }),
            status: AssemblyStatus::AwaitingAssembly,
            required_parts: Vec::new(),
            required_pieces: Vec::new(),
            required_models: Vec::new(),
            required_products: Vec::new(),
            packaging: None,
            created_at,
            updated_at: None,
        };
        for component in components {
            if let Some(list) = ComponentList::for_product(component.product_type) {
                group.list_mut(list).push(component);
            }
        }
        group
    }

    /// The order's single packaging group.
    pub fn packaging(
        order_id: OrderId,
        order_number: u64,
        required_products: Vec<RequiredProduct>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AssemblyGroupId::new(),
            order_id,
            order_number,
            kind: GroupKind::Packaging,
            target: None,
            status: AssemblyStatus::AwaitingAssembly,
            required_parts: Vec::new(),
            required_pieces: Vec::new(),
            required_models: Vec::new(),
            required_products,
            packaging: None,
            created_at,
            updated_at: None,
        }
    }

    pub fn instance_id(&self) -> Option<&AssemblyInstanceId> {
        self.target.as_ref().map(|t| &t.instance_id)
    }

    pub fn instance(&self) -> Option<&InstancePath> {
        self.target.as_ref().map(|t| &t.instance)
    }

    pub fn list(&self, list: ComponentList) -> &[RequiredComponent] {
        match list {
            ComponentList::Parts => &self.required_parts,
            ComponentList::Pieces => &self.required_pieces,
            ComponentList::Models => &self.required_models,
        }
    }

    pub fn list_mut(&mut self, list: ComponentList) -> &mut Vec<RequiredComponent> {
        match list {
            ComponentList::Parts => &mut self.required_parts,
            ComponentList::Pieces => &mut self.required_pieces,
            ComponentList::Models => &mut self.required_models,
        }
    }

    fn components(&self) -> impl Iterator<Item = &RequiredComponent> {
        self.required_parts
            .iter()
            .chain(&self.required_pieces)
            .chain(&self.required_models)
    }

    /// Whether any ledger on this group already holds an entry for `event_id`.
    pub fn has_event(&self, event_id: EventId) -> bool {
        self.components().any(|c| c.ledger.contains_event(event_id))
            || self.required_products.iter().any(|p| p.contains_event(event_id))
    }

    pub fn credit_component(
        &mut self,
        list: ComponentList,
        product_id: &ProductId,
        credit: Credit,
        quantity: u32,
        instance_ids: Vec<AssemblyInstanceId>,
    ) -> CreditOutcome {
        match self
            .list_mut(list)
            .iter_mut()
            .find(|c| &c.product_id == product_id)
        {
            Some(component) => component.credit(credit, quantity, instance_ids),
            None => CreditOutcome::NotRequired,
        }
    }

    /// Top-level packaging entry for a product.
    pub fn final_product_mut(
        &mut self,
        product_id: &ProductId,
        product_type: ProductType,
    ) -> Option<&mut RequiredProduct> {
        self.required_products
            .iter_mut()
            .find(|p| p.matches(product_id, product_type))
    }

    /// Every requirement the group tracks is met.
    pub fn requirements_satisfied(&self) -> bool {
        match self.kind {
            GroupKind::Packaging => self.required_products.iter().all(RequiredProduct::is_satisfied),
            _ => self.components().all(RequiredComponent::is_satisfied),
        }
    }

    fn has_progress(&self) -> bool {
        self.components().any(|c| !c.ledger.is_empty())
            || self.required_products.iter().any(|p| !p.ledger.is_empty())
    }

    pub fn advance(&mut self, next: AssemblyStatus, at: DateTime<Utc>) -> Transition<AssemblyStatus> {
        let transition = self.status.advance(next);
        if transition.is_applied() {
            self.updated_at = Some(at);
        }
        transition
    }

    /// Recompute the status implied by the ledgers.
    ///
    /// Satisfied assembly groups become ready for assembly; a satisfied
    /// packaging group becomes produced and awaiting packaging. Partial
    /// progress moves either to in-assembly.
    pub fn refresh_status(&mut self, at: DateTime<Utc>) -> Transition<AssemblyStatus> {
        let next = if self.requirements_satisfied() {
            match self.kind {
                GroupKind::Packaging => AssemblyStatus::ProducedAwaitingPackaging,
                _ => AssemblyStatus::ReadyForAssembly,
            }
        } else if self.has_progress() {
            AssemblyStatus::InAssembly
        } else {
            return Transition::Unchanged {
                current: self.status,
            };
        };
        self.advance(next, at)
    }

    /// Mark the whole group satisfied from stock.
    ///
    /// Every outstanding component is credited with a stock entry before the
    /// status moves to the terminal bypass. Groups already assembled are left
    /// untouched.
    pub fn fulfill_from_stock(&mut self, credit: Credit) -> Transition<AssemblyStatus> {
        if !self.status.permits(AssemblyStatus::FulfilledByStock) {
            return Transition::Unchanged {
                current: self.status,
            };
        }
        for list in [ComponentList::Parts, ComponentList::Pieces, ComponentList::Models] {
            for component in self.list_mut(list) {
                let remaining = component.remaining();
                component.credit(credit, remaining, Vec::new());
            }
        }
        self.advance(AssemblyStatus::FulfilledByStock, credit.at)
    }
}

impl Entity for AssemblyGroup {
    type Id = AssemblyGroupId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
