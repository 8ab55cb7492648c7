//! Per-call context supplied by the host.

use std::fmt;
use std::sync::Arc;

use mcpay::invocation::CallerIdentity;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::transport::{Elicitor, ProgressReporter};

/// What the calling client has advertised it can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientCapabilities {
    /// The client answers in-call elicitation requests.
    pub elicitation: bool,
    /// The client can sign x402 payments.
    pub x402: bool,
}

/// Identity, capabilities and transport hooks of one tool call.
///
/// Gated calls require one; free tools may be called without.
#[derive(Clone, Default)]
pub struct CallerContext {
    /// Who is calling.
    pub identity: CallerIdentity,
    /// Advertised client capabilities.
    pub capabilities: ClientCapabilities,
    /// In-call question channel, if the host supports it.
    pub elicitor: Option<Arc<dyn Elicitor>>,
    /// Progress channel, if the host supports it.
    pub progress: Option<Arc<dyn ProgressReporter>>,
    /// Fired when the caller gives up on the call.
    pub cancellation: CancellationToken,
    /// Latest instant the caller will wait for a blocking call.
    pub deadline: Option<Instant>,
}

impl fmt::Debug for CallerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerContext")
            .field("identity", &self.identity)
            .field("capabilities", &self.capabilities)
            .field("elicitor", &self.elicitor.is_some())
            .field("progress", &self.progress.is_some())
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl CallerContext {
    /// Creates a context for a session.
    #[must_use]
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            identity: CallerIdentity {
                session_id: Some(session_id.into()),
                user_id: None,
            },
            ..Self::default()
        }
    }

    /// Sets the authenticated user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.identity.user_id = Some(user_id.into());
        self
    }

    /// Installs an elicitation channel and advertises the capability.
    #[must_use]
    pub fn with_elicitor(mut self, elicitor: Arc<dyn Elicitor>) -> Self {
        self.elicitor = Some(elicitor);
        self.capabilities.elicitation = true;
        self
    }

    /// Installs a progress channel.
    #[must_use]
    pub fn with_progress(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(reporter);
        self
    }

    /// Advertises that the client signs x402 payments.
    #[must_use]
    pub const fn with_x402(mut self) -> Self {
        self.capabilities.x402 = true;
        self
    }

    /// Uses the host's cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Sets the caller's deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Returns the session id, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.identity.session_id.as_deref()
    }
}
