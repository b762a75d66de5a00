/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - designed to be **append-only**
///
/// Business time lives on the stored record, not on the payload, so payloads
/// written by external collaborators stay small.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event kind tag (e.g. "conclusao_producao").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event kind.
    fn version(&self) -> u32;
}
