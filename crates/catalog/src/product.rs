use serde::{Deserialize, Serialize};

use fabline_core::{DomainError, DomainResult, Entity, ProductId};

/// Hierarchy level of a catalog product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProductType {
    #[serde(rename = "kit")]
    Kit,
    #[serde(rename = "modelo")]
    Model,
    #[serde(rename = "peca")]
    Piece,
    #[serde(rename = "parte")]
    Part,
}

impl ProductType {
    /// Wire label, as used in event kinds and identifiers.
    pub fn label(self) -> &'static str {
        match self {
            ProductType::Kit => "kit",
            ProductType::Model => "modelo",
            ProductType::Piece => "peca",
            ProductType::Part => "parte",
        }
    }

    /// Whether a node of this type may directly contain a node of type `child`.
    pub fn may_contain(self, child: ProductType) -> bool {
        matches!(
            (self, child),
            (ProductType::Kit, ProductType::Model)
                | (ProductType::Kit, ProductType::Piece)
                | (ProductType::Model, ProductType::Piece)
                | (ProductType::Piece, ProductType::Part)
        )
    }
}

impl core::fmt::Display for ProductType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Detailed piece subtype. Part of the batch consolidation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PieceKind {
    /// One print yields the finished piece.
    #[serde(rename = "simples")]
    Simple,
    /// Several parts printed together in one job; no assembly.
    #[serde(rename = "composta_um_print")]
    CompositeSinglePrint,
    /// Parts printed in separate jobs, then assembled into the piece.
    #[serde(rename = "composta_multiplos_prints")]
    CompositeMultiPrint,
}

impl PieceKind {
    pub fn requires_assembly(self) -> bool {
        matches!(self, PieceKind::CompositeMultiPrint)
    }

    pub fn label(self) -> &'static str {
        match self {
            PieceKind::Simple => "simples",
            PieceKind::CompositeSinglePrint => "composta_um_print",
            PieceKind::CompositeMultiPrint => "composta_multiplos_prints",
        }
    }
}

/// A catalog item referenced with a quantity (part, filament, or other supply).
///
/// Filament quantities are grams; every other quantity is whole units.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemQuantity {
    pub id: ProductId,
    pub name: String,
    pub quantity: u64,
}

impl ItemQuantity {
    pub fn new(id: ProductId, name: impl Into<String>, quantity: u64) -> Self {
        Self {
            id,
            name: name.into(),
            quantity,
        }
    }
}

/// One print run needed per unit of a piece.
///
/// All quantities are per unit (one assembly instance of the piece).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintJob {
    #[serde(default)]
    pub parts: Vec<ItemQuantity>,
    #[serde(default)]
    pub filaments: Vec<ItemQuantity>,
    #[serde(default)]
    pub supplies: Vec<ItemQuantity>,
    #[serde(default)]
    pub print_minutes: u64,
    /// How many units fit in one batch. `None` means uncapped.
    #[serde(default)]
    pub max_batch_size: Option<u32>,
}

impl PrintJob {
    /// Capped at exactly one unit: never merged with other demand.
    pub fn is_singleton(&self) -> bool {
        self.max_batch_size == Some(1)
    }
}

/// A node of an ordered product tree.
///
/// Orders carry a denormalized snapshot of these trees (taken from the
/// catalog at order time), so later catalog edits never alter in-flight orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductNode {
    pub product_id: ProductId,
    pub product_type: ProductType,
    pub name: String,
    /// Units required per unit of the parent (or per order at top level).
    pub quantity: u32,
    #[serde(default)]
    pub piece_kind: Option<PieceKind>,
    /// Pieces only: the print runs that manufacture one unit.
    #[serde(default)]
    pub print_jobs: Vec<PrintJob>,
    /// Kits: models and pieces. Models: pieces. Pieces: parts.
    #[serde(default)]
    pub components: Vec<ProductNode>,
}

impl ProductNode {
    /// Whether an instance of this node gets its own assembly group.
    pub fn requires_assembly(&self) -> bool {
        match self.product_type {
            ProductType::Kit | ProductType::Model => true,
            ProductType::Piece => self.piece_kind.is_some_and(PieceKind::requires_assembly),
            ProductType::Part => false,
        }
    }

    /// Direct components of the given type.
    pub fn components_of(&self, product_type: ProductType) -> impl Iterator<Item = &ProductNode> {
        self.components
            .iter()
            .filter(move |c| c.product_type == product_type)
    }

    /// Validate the whole subtree before anything is derived from it.
    pub fn validate(&self) -> DomainResult<()> {
        self.validate_at(self.product_id.as_str())
    }

    fn validate_at(&self, path: &str) -> DomainResult<()> {
        if self.product_id.is_blank() {
            return Err(DomainError::validation(format!("{path}: product_id is required")));
        }
        if self.quantity == 0 {
            return Err(DomainError::validation(format!("{path}: quantity must be positive")));
        }

        match self.product_type {
            ProductType::Piece => {
                if self.piece_kind.is_none() {
                    return Err(DomainError::validation(format!("{path}: piece_kind is required")));
                }
                if self.print_jobs.is_empty() {
                    return Err(DomainError::validation(format!(
                        "{path}: a piece needs at least one print job"
                    )));
                }
            }
            _ if !self.print_jobs.is_empty() => {
                return Err(DomainError::validation(format!(
                    "{path}: only pieces carry print jobs"
                )));
            }
            _ => {}
        }

        for job in &self.print_jobs {
            if job.max_batch_size == Some(0) {
                return Err(DomainError::validation(format!(
                    "{path}: max_batch_size must be positive"
                )));
            }
            let items = job.parts.iter().chain(&job.filaments).chain(&job.supplies);
            for item in items {
                if item.id.is_blank() {
                    return Err(DomainError::validation(format!(
                        "{path}: print job references an item without id"
                    )));
                }
            }
        }

        for child in &self.components {
            if !self.product_type.may_contain(child.product_type) {
                return Err(DomainError::validation(format!(
                    "{path}: a {} cannot contain a {}",
                    self.product_type, child.product_type
                )));
            }
            let child_path = format!("{path}/{}", child.product_id);
            child.validate_at(&child_path)?;
        }

        Ok(())
    }
}

/// Direct component reference in a catalog product definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRef {
    pub product_id: ProductId,
    pub product_type: ProductType,
    pub quantity: u32,
}

/// Catalog product document.
///
/// Reconciliation resolves every product named in a stock-usage payload
/// against these documents before touching any fulfillment state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub product_type: ProductType,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub piece_kind: Option<PieceKind>,
    #[serde(default)]
    pub components: Vec<ComponentRef>,
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
