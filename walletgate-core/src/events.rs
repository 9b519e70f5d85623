//! Permission request callbacks.
//!
//! The host binds handlers per event kind to learn about new pending
//! requests. Each handler receives a [`PermissionRequest`] and the host must
//! eventually call `grant` or `deny` on it (from any task).

use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::permission::{PermissionRequest, TokenKind};

/// Events a handler can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionEvent {
    ProtocolPermissionRequested,
    BasketAccessRequested,
    CertificateAccessRequested,
    SpendingAuthorizationRequested,
}

impl PermissionEvent {
    /// The event announcing requests for tokens of `kind`.
    pub fn for_kind(kind: TokenKind) -> Self {
        match kind {
            TokenKind::Protocol => Self::ProtocolPermissionRequested,
            TokenKind::Basket => Self::BasketAccessRequested,
            TokenKind::Certificate => Self::CertificateAccessRequested,
            TokenKind::Spending => Self::SpendingAuthorizationRequested,
        }
    }
}

/// Handler for pending permission requests
///
/// # Example
/// ```
/// use walletgate_core::events::PermissionHandler;
/// use walletgate_core::permission::PermissionRequest;
///
/// struct Logger;
///
/// impl PermissionHandler for Logger {
///     fn on_request(&self, request: &PermissionRequest) {
///         println!("{} wants {:?}", request.originator(), request.info.descriptor);
///     }
/// }
/// ```
pub trait PermissionHandler: Send + Sync {
    /// Called once per new pending request
    fn on_request(&self, request: &PermissionRequest);
}

/// Blanket implementation for closures
impl<F> PermissionHandler for F
where
    F: Fn(&PermissionRequest) + Send + Sync,
{
    fn on_request(&self, request: &PermissionRequest) {
        self(request)
    }
}

/// Unique identifier for a bound handler.
///
/// Used to remove handlers via [`CallbackRegistry::unbind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub(crate) u64);

type Registration = (CallbackId, Arc<dyn PermissionHandler>);

/// Ordered handler lists per event.
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: RwLock<HashMap<PermissionEvent, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler; handlers for one event run in binding order.
    pub fn bind(
        &self,
        event: PermissionEvent,
        handler: impl PermissionHandler + 'static,
    ) -> CallbackId {
        self.bind_arc(event, Arc::new(handler))
    }

    /// Bind a shared handler, keeping a reference for [`unbind_handler`](Self::unbind_handler).
    pub fn bind_arc(
        &self,
        event: PermissionEvent,
        handler: Arc<dyn PermissionHandler>,
    ) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(event)
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove the registration with this id.
    ///
    /// Returns `false` if it was not bound.
    pub fn unbind(&self, id: CallbackId) -> bool {
        let mut handlers = self.handlers.write();
        for registrations in handlers.values_mut() {
            if let Some(pos) = registrations.iter().position(|(bound, _)| *bound == id) {
                registrations.remove(pos);
                return true;
            }
        }
        false
    }

    /// Remove the first registration of this exact handler.
    pub fn unbind_handler(&self, handler: &Arc<dyn PermissionHandler>) -> bool {
        let target = Arc::as_ptr(handler) as *const ();
        let mut handlers = self.handlers.write();
        for registrations in handlers.values_mut() {
            if let Some(pos) = registrations
                .iter()
                .position(|(_, bound)| Arc::as_ptr(bound) as *const () == target)
            {
                registrations.remove(pos);
                return true;
            }
        }
        false
    }

    /// Number of handlers bound to `event`.
    pub fn handler_count(&self, event: PermissionEvent) -> usize {
        self.handlers.read().get(&event).map_or(0, Vec::len)
    }

    /// Invoke every handler bound to `event`.
    ///
    /// A panicking handler is logged and skipped; the rest still run.
    /// Returns the number of handlers that completed.
    pub fn dispatch(&self, event: PermissionEvent, request: &PermissionRequest) -> usize {
        // Handlers may bind/unbind from inside a callback
        let registrations: Vec<Registration> = self
            .handlers
            .read()
            .get(&event)
            .cloned()
            .unwrap_or_default();

        if registrations.is_empty() {
            log::warn!(
                "No handler bound for {:?}; request {} stays pending",
                event,
                request.request_id()
            );
        }

        let mut completed = 0;
        for (id, handler) in registrations {
            match catch_unwind(AssertUnwindSafe(|| handler.on_request(request))) {
                Ok(()) => completed += 1,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    log::error!(
                        "Handler {:?} for {:?} panicked on request {}: {}",
                        id,
                        event,
                        request.request_id(),
                        message
                    );
                }
            }
        }
        completed
    }
}
