//! Breakpoint controller: a one-shot future tied to a step id.

use tracing::debug;

use crate::deferred::Deferred;

/// Future handed out by [`Breakpoint::set`].
///
/// Resolves to `true` when the armed id is reached, or `false` when the
/// breakpoint is superseded or removed first.
pub type BreakpointHit = Deferred<bool>;

/// The armed breakpoint, if any.
#[derive(Debug, Default)]
pub struct Breakpoint {
    id: Option<String>,
    pending: BreakpointHit,
}

impl Breakpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a breakpoint for `id`, or clear it with `None`.
    ///
    /// Any previously pending future resolves to `false`. Returns the new
    /// future when arming, `None` when clearing.
    pub fn set(&mut self, id: Option<String>) -> Option<BreakpointHit> {
        if id.is_none() && self.id.is_none() {
            return None;
        }

        self.pending.resolve(false);
        self.pending = Deferred::new();
        self.id = id;

        let armed = self.id.as_deref()?;
        debug!(id = armed, "breakpoint armed");
        Some(self.pending.clone())
    }

    /// Equivalent to `set(None)`.
    pub fn remove(&mut self) {
        self.set(None);
    }

    /// Check a reached step id against the armed one.
    ///
    /// On a match the future resolves to `true`, the breakpoint is
    /// cleared and `true` is returned so the engine can pause.
    pub fn check(&mut self, id: &str) -> bool {
        if self.id.as_deref() != Some(id) {
            return false;
        }

        debug!(id, "breakpoint reached");
        self.pending.resolve(true);
        self.id = None;
        true
    }

    /// The armed id.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns true while a breakpoint is armed and not yet resolved.
    pub fn is_armed(&self) -> bool {
        self.id.is_some() && self.pending.is_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_without_arm_is_noop() {
        let mut breakpoint = Breakpoint::new();
        assert!(breakpoint.set(None).is_none());
        assert!(!breakpoint.is_armed());
    }

    #[tokio::test]
    async fn test_reaching_armed_id_resolves_true_once() {
        let mut breakpoint = Breakpoint::new();
        let hit = breakpoint.set(Some("b2".into())).unwrap();

        assert!(!breakpoint.check("b1"));
        assert!(breakpoint.check("b2"));
        assert!(hit.wait().await);

        // Cleared after the hit
        assert!(!breakpoint.check("b2"));
        assert_eq!(breakpoint.id(), None);
    }

    #[tokio::test]
    async fn test_rearm_resolves_previous_false() {
        let mut breakpoint = Breakpoint::new();
        let first = breakpoint.set(Some("b1".into())).unwrap();
        let second = breakpoint.set(Some("b2".into())).unwrap();

        assert!(!first.wait().await);
        assert!(second.is_pending());
        assert_eq!(breakpoint.id(), Some("b2"));
    }

    #[tokio::test]
    async fn test_remove_while_pending_resolves_false() {
        let mut breakpoint = Breakpoint::new();
        let hit = breakpoint.set(Some("b1".into())).unwrap();

        breakpoint.remove();

        assert!(!hit.wait().await);
        assert!(!breakpoint.is_armed());
        assert!(!breakpoint.check("b1"));
    }
}
