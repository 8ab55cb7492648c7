//! Versioned per-session tool visibility for DYNAMIC_TOOLS.
//!
//! While a payment is pending in a session, the paid tool is hidden from that
//! session and the generic confirmation tool is shown. Every change bumps a
//! gate-wide version and yields a [`ToolListChanged`] event for the host.
//! The lock is never held across an await.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use crate::transport::ToolListChanged;

#[derive(Debug, Default)]
struct SessionView {
    /// Tool name to the payment ids holding it hidden.
    hidden: HashMap<String, HashSet<String>>,
}

impl SessionView {
    fn has_pending(&self) -> bool {
        !self.hidden.is_empty()
    }
}

#[derive(Debug, Default)]
struct State {
    version: u64,
    sessions: HashMap<String, SessionView>,
}

/// The set of tools hidden per session.
#[derive(Debug, Default)]
pub struct VisibilitySet {
    state: RwLock<State>,
}

impl VisibilitySet {
    /// Creates an empty set at version 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version. Increases by one on every change.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.read().unwrap_or_else(PoisonError::into_inner).version
    }

    /// Hides `tool` in `session` until `payment_id` is settled.
    ///
    /// Returns the change event, or `None` if the session's view did not
    /// change (the tool was already hidden by another payment).
    pub fn hide(&self, session: &str, tool: &str, payment_id: &str) -> Option<ToolListChanged> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let view = state.sessions.entry(session.to_owned()).or_default();
        let holders = view.hidden.entry(tool.to_owned()).or_default();
        let was_visible = holders.is_empty();
        holders.insert(payment_id.to_owned());
        was_visible.then(|| bump(&mut state, session))
    }

    /// Releases the hold `payment_id` had on `tool` in `session`.
    ///
    /// Returns the change event if the tool became visible again.
    pub fn restore(&self, session: &str, tool: &str, payment_id: &str) -> Option<ToolListChanged> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let view = state.sessions.get_mut(session)?;
        let holders = view.hidden.get_mut(tool)?;
        if !holders.remove(payment_id) || !holders.is_empty() {
            return None;
        }
        view.hidden.remove(tool);
        if !view.has_pending() {
            state.sessions.remove(session);
        }
        Some(bump(&mut state, session))
    }

    /// Returns `true` if `tool` is hidden in `session`.
    #[must_use]
    pub fn is_hidden(&self, session: &str, tool: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .get(session)
            .is_some_and(|view| view.hidden.contains_key(tool))
    }

    /// Returns `true` if `session` has a payment awaiting confirmation.
    #[must_use]
    pub fn has_pending(&self, session: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .get(session)
            .is_some_and(SessionView::has_pending)
    }
}

fn bump(state: &mut State, session: &str) -> ToolListChanged {
    state.version += 1;
    ToolListChanged {
        session_id: session.to_owned(),
        version: state.version,
    }
}
