//! Forward-only status lifecycles and optimistic concurrency expectations.

use crate::error::{DomainError, DomainResult};

/// Optimistic concurrency expectation for a stored document.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (blind writes, e.g. creating a fresh document id).
    Any,
    /// The document must not exist yet.
    Absent,
    /// Require the document to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// `actual` is `None` when the document does not exist.
    pub fn matches(self, actual: Option<u64>) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Absent => actual.is_none(),
            ExpectedVersion::Exact(v) => actual == Some(v),
        }
    }

    pub fn check(self, actual: Option<u64>) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual:?})"
            )))
        }
    }
}

/// A status enum whose transitions only ever move forward.
///
/// Handlers run under at-least-once delivery, so asking for a transition the
/// entity has already passed is not an error: [`Lifecycle::advance`] reports
/// [`Transition::Unchanged`] and leaves the status alone.
pub trait Lifecycle: Copy + Eq + core::fmt::Debug {
    /// Position in the forward sequence. Sibling terminal states share a rank.
    fn rank(self) -> u8;

    /// Terminal states accept no further transition.
    fn is_terminal(self) -> bool;

    /// Whether `next` is a legal forward move from `self`.
    fn permits(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Move to `next` if permitted; otherwise report the status unchanged.
    fn advance(&mut self, next: Self) -> Transition<Self> {
        let from = *self;
        if from.permits(next) {
            *self = next;
            Transition::Applied { from, to: next }
        } else {
            Transition::Unchanged { current: from }
        }
    }
}

/// Outcome of a lifecycle transition request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition<S> {
    Applied { from: S, to: S },
    Unchanged { current: S },
}

impl<S> Transition<S> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}
