//! Assembly-instance identifiers.
//!
//! An instance is addressed by its position in the order's BOM tree: the order
//! id followed by one `(product, index)` step per level, indexes 1-based.
//! The structured [`InstancePath`] is the source of truth; the flat
//! [`AssemblyInstanceId`] (`{order}-{product}-{index}-...`) is derived from it
//! for display and equality queries and is never parsed back.

use core::fmt;

use serde::{Deserialize, Serialize};

use fabline_catalog::ProductType;
use fabline_core::{DomainError, OrderId, ProductId};

/// Flat, hyphen-joined instance id.
///
/// Every ancestor's id is a literal prefix of a descendant's id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssemblyInstanceId(String);

impl AssemblyInstanceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssemblyInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One level of an instance path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathStep {
    pub product_id: ProductId,
    pub product_type: ProductType,
    /// 1-based occurrence of this product under its parent.
    pub index: u32,
}

impl PathStep {
    pub fn new(product_id: ProductId, product_type: ProductType, index: u32) -> Self {
        Self {
            product_id,
            product_type,
            index,
        }
    }
}

#[derive(Deserialize)]
struct RawInstancePath {
    order_id: OrderId,
    steps: Vec<PathStep>,
}

/// Position of an assembly instance in its order's BOM tree.
///
/// Always holds at least one step; deserialization rejects empty paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawInstancePath")]
pub struct InstancePath {
    order_id: OrderId,
    steps: Vec<PathStep>,
}

impl TryFrom<RawInstancePath> for InstancePath {
    type Error = DomainError;

    fn try_from(raw: RawInstancePath) -> Result<Self, Self::Error> {
        if raw.steps.is_empty() {
            return Err(DomainError::invalid_id("instance path needs at least one step"));
        }
        if raw.steps.iter().any(|s| s.index == 0) {
            return Err(DomainError::invalid_id("instance indexes are 1-based"));
        }
        Ok(Self {
            order_id: raw.order_id,
            steps: raw.steps,
        })
    }
}

impl InstancePath {
    /// A top-level product occurrence.
    pub fn root(order_id: OrderId, step: PathStep) -> Self {
        Self {
            order_id,
            steps: vec![step],
        }
    }

    /// A component occurrence nested under `self`.
    pub fn child(&self, step: PathStep) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self {
            order_id: self.order_id,
            steps,
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// 1 for top-level products.
    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    pub fn is_top_level(&self) -> bool {
        self.steps.len() == 1
    }

    /// The step naming this instance's own product.
    pub fn leaf(&self) -> &PathStep {
        // Non-empty by construction.
        &self.steps[self.steps.len() - 1]
    }

    pub fn product_id(&self) -> &ProductId {
        &self.leaf().product_id
    }

    pub fn product_type(&self) -> ProductType {
        self.leaf().product_type
    }

    /// The ancestor `depth` levels deep (`1..=self.depth()`), or `None`.
    pub fn ancestor_at(&self, depth: usize) -> Option<InstancePath> {
        if depth == 0 || depth > self.steps.len() {
            return None;
        }
        Some(Self {
            order_id: self.order_id,
            steps: self.steps[..depth].to_vec(),
        })
    }

    /// Direct parent instance; `None` for top-level products.
    pub fn parent(&self) -> Option<InstancePath> {
        self.ancestor_at(self.steps.len() - 1)
    }

    /// Closest ancestor of the given product type.
    pub fn nearest_ancestor_of_type(&self, product_type: ProductType) -> Option<InstancePath> {
        let parent_len = self.steps.len() - 1;
        self.steps[..parent_len]
            .iter()
            .rposition(|s| s.product_type == product_type)
            .and_then(|pos| self.ancestor_at(pos + 1))
    }

    /// Strict descendant test, by step prefix.
    pub fn is_descendant_of(&self, ancestor: &InstancePath) -> bool {
        self.order_id == ancestor.order_id
            && self.steps.len() > ancestor.steps.len()
            && self.steps.starts_with(&ancestor.steps)
    }

    pub fn is_self_or_descendant_of(&self, ancestor: &InstancePath) -> bool {
        self == ancestor || self.is_descendant_of(ancestor)
    }

    /// Flat id: `{order}` followed by `-{product}-{index}` per step.
    pub fn id(&self) -> AssemblyInstanceId {
        let mut out = self.order_id.to_string();
        for step in &self.steps {
            out.push('-');
            out.push_str(step.product_id.as_str());
            out.push('-');
            out.push_str(&step.index.to_string());
        }
        AssemblyInstanceId(out)
    }
}

impl fmt::Display for InstancePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id(), f)
    }
}

/// One concrete occurrence of a product unit within an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyInstance {
    pub id: AssemblyInstanceId,
    pub path: InstancePath,
    pub name: String,
    /// Always 1: each unit of quantity is its own instance.
    pub required_quantity: u32,
    #[serde(default)]
    pub parent_kit_id: Option<ProductId>,
    #[serde(default)]
    pub parent_model_id: Option<ProductId>,
}

impl AssemblyInstance {
    pub fn from_path(path: InstancePath, name: impl Into<String>) -> Self {
        let ancestor_product = |t| {
            path.nearest_ancestor_of_type(t)
                .map(|p| p.product_id().clone())
        };
        Self {
            id: path.id(),
            parent_kit_id: ancestor_product(ProductType::Kit),
            parent_model_id: ancestor_product(ProductType::Model),
            name: name.into(),
            required_quantity: 1,
            path,
        }
    }

    pub fn product_id(&self) -> &ProductId {
        self.path.product_id()
    }

    pub fn product_type(&self) -> ProductType {
        self.path.product_type()
    }
}
