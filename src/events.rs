//! Typed diagnostic event bus.
//!
//! The transport is the sole emitter; metrics and logging layers subscribe
//! without the transport depending on them. The event set is closed: it is an
//! enum at the typed API, and the string boundary for dynamically registered
//! observers rejects unknown names with a configuration error.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{TransportError, TransportResult};

/// The closed set of diagnostic event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    /// A request is about to be sent to a node
    Request,
    /// A request reached a terminal outcome (success or failure)
    Response,
    /// A sniff round completed
    Sniff,
    /// A dead connection was tested for resurrection
    Resurrect,
    /// A request body is about to be serialized
    Serialization,
    /// A response body is about to be deserialized
    Deserialization,
}

impl DiagnosticKind {
    /// All event kinds, in a stable order
    pub const ALL: [Self; 6] = [
        Self::Request,
        Self::Response,
        Self::Sniff,
        Self::Resurrect,
        Self::Serialization,
        Self::Deserialization,
    ];

    /// Canonical lowercase name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Sniff => "sniff",
            Self::Resurrect => "resurrect",
            Self::Serialization => "serialization",
            Self::Deserialization => "deserialization",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiagnosticKind {
    type Err = TransportError;

    fn from_str(s: &str) -> TransportResult<Self> {
        match s {
            "request" => Ok(Self::Request),
            "response" => Ok(Self::Response),
            "sniff" => Ok(Self::Sniff),
            "resurrect" => Ok(Self::Resurrect),
            "serialization" => Ok(Self::Serialization),
            "deserialization" => Ok(Self::Deserialization),
            other => Err(TransportError::Configuration(format!(
                "unknown diagnostic event name: {other}"
            ))),
        }
    }
}

/// A single published event
#[derive(Debug, Clone)]
pub struct DiagnosticEvent {
    /// Which phase produced the event
    pub kind: DiagnosticKind,
    /// Error associated with the event, if the phase failed
    pub error: Option<TransportError>,
    /// Structured payload (request metadata, resurrection outcome, ...)
    pub payload: Value,
}

/// Handler invoked synchronously on the emitting call stack
pub type DiagnosticHandler = Arc<dyn Fn(&DiagnosticEvent) + Send + Sync>;

/// Handle returned by `on`/`once`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: u64,
    once: bool,
    handler: DiagnosticHandler,
}

/// Publish/subscribe channel for transport diagnostics.
///
/// Dispatch is synchronous and in subscription order. Handlers registered
/// with [`Diagnostic::once`] are removed after their first invocation.
pub struct Diagnostic {
    subscribers: RwLock<HashMap<DiagnosticKind, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .subscribers
            .read()
            .iter()
            .map(|(kind, subs)| (kind.as_str(), subs.len()))
            .collect();
        f.debug_struct("Diagnostic")
            .field("subscribers", &counts)
            .finish()
    }
}

impl Diagnostic {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to an event kind
    pub fn on<F>(&self, kind: DiagnosticKind, handler: F) -> SubscriptionId
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        self.subscribe(kind, false, Arc::new(handler))
    }

    /// Subscribe for a single delivery
    pub fn once<F>(&self, kind: DiagnosticKind, handler: F) -> SubscriptionId
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        self.subscribe(kind, true, Arc::new(handler))
    }

    /// Subscribe by event name.
    ///
    /// This is the boundary where external strings enter (plugins registering
    /// dynamically); unknown names fail with a configuration error.
    pub fn on_named<F>(&self, name: &str, handler: F) -> TransportResult<SubscriptionId>
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        Ok(self.on(name.parse()?, handler))
    }

    /// Remove a subscription; returns whether it was present
    pub fn off(&self, kind: DiagnosticKind, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        if let Some(subs) = subscribers.get_mut(&kind) {
            let before = subs.len();
            subs.retain(|s| s.id != id.0);
            return subs.len() != before;
        }
        false
    }

    /// Publish an event to all subscribers of its kind
    pub fn emit(&self, kind: DiagnosticKind, error: Option<TransportError>, payload: Value) {
        let handlers: Vec<DiagnosticHandler> = {
            let mut subscribers = self.subscribers.write();
            match subscribers.get_mut(&kind) {
                Some(subs) => {
                    let handlers = subs.iter().map(|s| s.handler.clone()).collect();
                    subs.retain(|s| !s.once);
                    handlers
                }
                None => return,
            }
        };

        let event = DiagnosticEvent {
            kind,
            error,
            payload,
        };
        // Lock released before dispatch so handlers may re-subscribe
        for handler in handlers {
            handler(&event);
        }
    }

    /// Number of subscribers for a kind
    pub fn subscriber_count(&self, kind: DiagnosticKind) -> usize {
        self.subscribers
            .read()
            .get(&kind)
            .map_or(0, std::vec::Vec::len)
    }

    fn subscribe(
        &self,
        kind: DiagnosticKind,
        once: bool,
        handler: DiagnosticHandler,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .entry(kind)
            .or_default()
            .push(Subscriber { id, once, handler });
        SubscriptionId(id)
    }
}

impl Default for Diagnostic {
    fn default() -> Self {
        Self::new()
    }
}
