//! Production fulfillment workflow.
//!
//! - **Explosion** turns an order's product tree into addressable assembly
//!   instances, assembly groups, one packaging group, and print demand.
//! - **Consolidation** folds print demand into capped production batches
//!   shared across orders.
//! - **Workflow** handlers react to production events, one per event kind,
//!   moving finished units up the hierarchy until the order is packaged.
//! - **Reconciliation** lets stock stand in for production at any level.
//!
//! Handlers are pure over a [`workflow::WorkflowReader`]: they return a
//! [`workflow::Decision`] that the infrastructure commits atomically.

pub mod batch;
pub mod consolidation;
pub mod error;
pub mod event;
pub mod explosion;
pub mod group;
pub mod identifier;
pub mod reconciliation;
pub mod workflow;

pub use batch::{BatchStatus, CompositionKey, JobRole, OriginOrder, ProductionBatch};
pub use consolidation::{ConsolidationPlan, consolidate};
pub use error::{WorkflowError, WorkflowResult};
pub use event::{ProductionEvent, ProductionEventRecord};
pub use explosion::{Explosion, PrintDemand, explode, instances_of};
pub use group::{AssemblyGroup, AssemblyStatus, FulfillmentOrigin, GroupKind};
pub use identifier::{AssemblyInstance, AssemblyInstanceId, InstancePath, PathStep};
pub use reconciliation::ReconciliationTarget;
pub use workflow::{Decision, EdgeDecision, WorkflowPolicy, WorkflowReader, Write, handle};
