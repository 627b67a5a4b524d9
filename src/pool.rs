//! Connection pool family.
//!
//! All variants implement [`ConnectionPool`]: [`ClusterPool`] tracks node
//! health with a dead queue and time-gated resurrection, [`WeightedPool`]
//! steers traffic away from failing nodes by down-weighting them, and
//! [`CloudPool`] manages the single pre-built connection of a hosted
//! deployment.
//!
//! Pool state is mutated from many concurrently in-flight requests sharing
//! one transport; every mutation (health transitions, dead-queue reordering,
//! cursor advancement, weight recompute) happens under a single mutex so
//! selection always observes a consistent snapshot.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::connection::{Connection, Connector, NodeConfig, NodeStatus, RequestParams};
use crate::errors::{TransportError, TransportResult};
use crate::events::{Diagnostic, DiagnosticKind};
use crate::selector::{NodeFilter, NodeSelector};

/// Time budget for a resurrection probe
const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Default weight ceiling for nodes in a [`WeightedPool`]
pub const DEFAULT_NODE_WEIGHT: u32 = 100;

/// How dead connections are brought back into rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResurrectStrategy {
    /// Probe the candidate with a lightweight request before trusting it
    #[default]
    Ping,
    /// Assume the candidate recovered without testing
    Optimistic,
    /// Never resurrect; connections stay dead until marked alive externally
    None,
}

impl ResurrectStrategy {
    /// Canonical lowercase name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Optimistic => "optimistic",
            Self::None => "none",
        }
    }
}

impl FromStr for ResurrectStrategy {
    type Err = TransportError;

    fn from_str(s: &str) -> TransportResult<Self> {
        match s {
            "ping" => Ok(Self::Ping),
            "optimistic" => Ok(Self::Optimistic),
            "none" => Ok(Self::None),
            other => Err(TransportError::Configuration(format!(
                "unknown resurrect strategy: {other}"
            ))),
        }
    }
}

/// Per-call selection context passed to [`ConnectionPool::get_connection`].
///
/// The request id and client name flow into resurrection probes so events
/// triggered by this request correlate with it.
#[derive(Debug, Clone)]
pub struct SelectionContext {
    /// Filter override; the pool's configured filter applies when absent
    pub filter: Option<NodeFilter>,
    /// Selector override; the pool's configured selector applies when absent
    pub selector: Option<NodeSelector>,
    /// Id of the request triggering this selection
    pub request_id: String,
    /// Client name, carried on emitted events
    pub name: String,
    /// Current time in epoch millis; injected for testability
    pub now_ms: u64,
}

impl SelectionContext {
    /// Build a context for one selection
    pub fn new(request_id: impl Into<String>, name: impl Into<String>, now_ms: u64) -> Self {
        Self {
            filter: None,
            selector: None,
            request_id: request_id.into(),
            name: name.into(),
            now_ms,
        }
    }
}

/// Common contract of every pool variant
#[async_trait]
pub trait ConnectionPool: Send + Sync + fmt::Debug {
    /// Create-if-absent; returns the existing connection when the same node
    /// is added twice, and fails when the id is taken by a different node
    fn add_connection(&self, node: NodeConfig) -> TransportResult<Arc<Connection>>;

    /// Remove a connection from the pool and the dead queue; returns whether
    /// it was present
    fn remove_connection(&self, id: &str) -> bool;

    /// Reconcile the pool against a desired node set.
    ///
    /// Unchanged nodes keep their health state, removed nodes are closed
    /// best-effort in the background, new nodes start alive.
    fn update(&self, nodes: Vec<NodeConfig>) -> TransportResult<()>;

    /// Record a failure on a connection. No-op if the connection is no
    /// longer tracked by this pool.
    fn mark_dead(&self, connection: &Arc<Connection>, now_ms: u64);

    /// Record a success on a connection, resetting its failure counters.
    /// Safe to call for connections that were never dead.
    fn mark_alive(&self, connection: &Arc<Connection>);

    /// Select a connection for the next request.
    ///
    /// Runs the resurrection step first, then filters and selects. Returns
    /// `None` only when the pool holds no connections at all; if every node
    /// is dead the oldest-failing one is returned for re-probing.
    async fn get_connection(&self, ctx: &SelectionContext) -> Option<Arc<Connection>>;

    /// Close every connection (waiting for in-flight requests to drain) and
    /// reset selection state
    async fn empty(&self);

    /// Snapshot of the tracked connections, in insertion order
    fn connections(&self) -> Vec<Arc<Connection>>;

    /// Whether the pool holds no connections
    fn is_empty(&self) -> bool {
        self.connections().is_empty()
    }
}

/// Close a removed connection without blocking the caller
fn close_in_background(connection: Arc<Connection>) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move { connection.close(false).await });
    }
}

// ---------------------------------------------------------------------------
// ClusterPool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct DeadEntry {
    id: String,
    resurrect_timeout: u64,
    seq: u64,
}

#[derive(Debug)]
struct ClusterCore {
    connections: Vec<Arc<Connection>>,
    // Ascending by (resurrect_timeout, insertion seq)
    dead: Vec<DeadEntry>,
    cursor: usize,
    seq: u64,
}

impl ClusterCore {
    fn find(&self, id: &str) -> Option<&Arc<Connection>> {
        self.connections.iter().find(|c| c.id() == id)
    }

    fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }
}

/// Health-tracking pool with a dead queue and time-gated resurrection
pub struct ClusterPool {
    connector: Arc<dyn Connector>,
    diagnostic: Arc<Diagnostic>,
    strategy: ResurrectStrategy,
    filter: NodeFilter,
    selector: NodeSelector,
    core: Mutex<ClusterCore>,
}

impl fmt::Debug for ClusterPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("ClusterPool")
            .field("connections", &core.connections.len())
            .field("dead", &core.dead.len())
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl ClusterPool {
    /// Create an empty pool with the default ping resurrection strategy
    pub fn new(connector: Arc<dyn Connector>, diagnostic: Arc<Diagnostic>) -> Self {
        Self {
            connector,
            diagnostic,
            strategy: ResurrectStrategy::default(),
            filter: NodeFilter::default(),
            selector: NodeSelector::default(),
            core: Mutex::new(ClusterCore {
                connections: Vec::new(),
                dead: Vec::new(),
                cursor: 0,
                seq: 0,
            }),
        }
    }

    /// Set the resurrection strategy
    #[must_use]
    pub const fn with_resurrect_strategy(mut self, strategy: ResurrectStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the default node filter
    #[must_use]
    pub fn with_filter(mut self, filter: NodeFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the default selection strategy
    #[must_use]
    pub fn with_selector(mut self, selector: NodeSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Test one eligible dead connection, if any.
    ///
    /// At most one candidate is probed per call: the head of the dead queue,
    /// and only once its resurrect deadline has passed.
    async fn resurrect(&self, ctx: &SelectionContext) {
        if self.strategy == ResurrectStrategy::None {
            return;
        }

        let candidate = {
            let mut core = self.core.lock();
            match core.dead.first() {
                Some(entry) if entry.resurrect_timeout <= ctx.now_ms => {
                    let entry = core.dead.remove(0);
                    core.find(&entry.id).cloned()
                }
                _ => return,
            }
        };
        let Some(connection) = candidate else { return };

        match self.strategy {
            ResurrectStrategy::Optimistic => {
                connection.set_status_alive();
                self.emit_resurrect(&connection, true, None, ctx);
            }
            ResurrectStrategy::Ping => {
                let params = RequestParams {
                    method: "HEAD".to_string(),
                    path: "/".to_string(),
                    headers: HashMap::new(),
                    querystring: None,
                    body: None,
                    timeout: Some(PING_TIMEOUT),
                };
                match connection.request(params, &CancellationToken::new()).await {
                    Ok(_) => {
                        connection.set_status_alive();
                        debug!(id = connection.id(), "resurrected connection");
                        self.emit_resurrect(&connection, true, None, ctx);
                    }
                    Err(err) => {
                        // Failed probe compounds the dead count
                        self.mark_dead(&connection, ctx.now_ms);
                        debug!(id = connection.id(), "resurrection probe failed");
                        self.emit_resurrect(&connection, false, Some(err), ctx);
                    }
                }
            }
            ResurrectStrategy::None => unreachable!("checked above"),
        }
    }

    fn emit_resurrect(
        &self,
        connection: &Arc<Connection>,
        is_alive: bool,
        error: Option<TransportError>,
        ctx: &SelectionContext,
    ) {
        self.diagnostic.emit(
            DiagnosticKind::Resurrect,
            error,
            json!({
                "strategy": self.strategy.as_str(),
                "isAlive": is_alive,
                "connection": connection.diagnostic_view(),
                "name": ctx.name,
                "request": { "id": ctx.request_id },
            }),
        );
    }
}

#[async_trait]
impl ConnectionPool for ClusterPool {
    fn add_connection(&self, node: NodeConfig) -> TransportResult<Arc<Connection>> {
        let id = node.resolved_id();
        let mut core = self.core.lock();
        if let Some(existing) = core.find(&id) {
            if existing.url() == &node.url {
                return Ok(existing.clone());
            }
            return Err(TransportError::Configuration(format!(
                "connection with id {id} already exists with a different address"
            )));
        }
        let connection = Arc::new(Connection::new(node, self.connector.clone()));
        trace!(id = connection.id(), "added connection");
        core.connections.push(connection.clone());
        Ok(connection)
    }

    fn remove_connection(&self, id: &str) -> bool {
        let removed = {
            let mut core = self.core.lock();
            core.dead.retain(|e| e.id != id);
            let position = core.connections.iter().position(|c| c.id() == id);
            position.map(|i| core.connections.remove(i))
        };
        match removed {
            Some(connection) => {
                close_in_background(connection);
                true
            }
            None => false,
        }
    }

    fn update(&self, nodes: Vec<NodeConfig>) -> TransportResult<()> {
        let mut removed = Vec::new();
        {
            let mut core = self.core.lock();
            let existing: HashMap<String, Arc<Connection>> = core
                .connections
                .iter()
                .map(|c| (c.id().to_string(), c.clone()))
                .collect();

            let mut incoming = HashSet::with_capacity(nodes.len());
            let mut next = Vec::with_capacity(nodes.len());
            for node in nodes {
                let id = node.resolved_id();
                if !incoming.insert(id.clone()) {
                    continue;
                }
                if let Some(connection) = existing.get(&id) {
                    // Rediscovery counts as evidence of life unless the
                    // strategy keeps nodes dead until external confirmation
                    if connection.status() == NodeStatus::Dead
                        && self.strategy != ResurrectStrategy::None
                    {
                        connection.set_status_alive();
                        core.dead.retain(|e| e.id != id);
                    }
                    next.push(connection.clone());
                } else {
                    next.push(Arc::new(Connection::new(node, self.connector.clone())));
                }
            }

            for connection in &core.connections {
                if !incoming.contains(connection.id()) {
                    removed.push(connection.clone());
                }
            }
            core.dead.retain(|e| incoming.contains(&e.id));
            core.connections = next;
        }

        for connection in removed {
            debug!(id = connection.id(), "removing connection after update");
            close_in_background(connection);
        }
        Ok(())
    }

    fn mark_dead(&self, connection: &Arc<Connection>, now_ms: u64) {
        let mut core = self.core.lock();
        if !core.contains(connection.id()) {
            // The pool was updated away from this node mid-request
            return;
        }
        let resurrect_timeout = connection.set_status_dead(now_ms);
        let id = connection.id().to_string();
        core.dead.retain(|e| e.id != id);
        let seq = core.seq;
        core.seq += 1;
        core.dead.push(DeadEntry {
            id,
            resurrect_timeout,
            seq,
        });
        core.dead
            .sort_by_key(|e| (e.resurrect_timeout, e.seq));
        debug!(
            id = connection.id(),
            dead_count = connection.dead_count(),
            "marked connection dead"
        );
    }

    fn mark_alive(&self, connection: &Arc<Connection>) {
        let mut core = self.core.lock();
        if !core.contains(connection.id()) {
            return;
        }
        connection.set_status_alive();
        core.dead.retain(|e| e.id != connection.id());
    }

    async fn get_connection(&self, ctx: &SelectionContext) -> Option<Arc<Connection>> {
        self.resurrect(ctx).await;

        let mut core = self.core.lock();
        let filter = ctx.filter.as_ref().unwrap_or(&self.filter);
        let selector = ctx.selector.as_ref().unwrap_or(&self.selector);

        let filtered: Vec<Arc<Connection>> = core
            .connections
            .iter()
            .filter(|c| c.status() == NodeStatus::Alive && filter.accepts(c))
            .cloned()
            .collect();

        if !filtered.is_empty() {
            let index = selector.select(&filtered, &mut core.cursor);
            return Some(filtered[index].clone());
        }

        if core.connections.is_empty() {
            return None;
        }

        // Everything is dead or filtered out; re-probe the node that has
        // been failing the longest rather than refusing outright
        if let Some(entry) = core.dead.first()
            && let Some(connection) = core.find(&entry.id)
        {
            return Some(connection.clone());
        }
        core.connections.first().cloned()
    }

    async fn empty(&self) {
        let connections = {
            let mut core = self.core.lock();
            core.dead.clear();
            core.cursor = 0;
            std::mem::take(&mut core.connections)
        };
        futures::future::join_all(connections.iter().map(|c| c.close(false))).await;
        debug!(count = connections.len(), "emptied pool");
    }

    fn connections(&self) -> Vec<Arc<Connection>> {
        self.core.lock().connections.clone()
    }
}

// ---------------------------------------------------------------------------
// WeightedPool
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct WeightedEntry {
    connection: Arc<Connection>,
    weight: u32,
    ceiling: u32,
}

#[derive(Debug)]
struct WeightedCore {
    entries: Vec<WeightedEntry>,
    max_weight: u32,
    gcd: u32,
    current_weight: i64,
    index: isize,
}

impl WeightedCore {
    fn recompute(&mut self) {
        self.max_weight = self.entries.iter().map(|e| e.weight).max().unwrap_or(0);
        self.gcd = self.entries.iter().map(|e| e.weight).fold(0, gcd);
    }

    fn reset_selection(&mut self) {
        self.index = -1;
        self.current_weight = 0;
    }
}

const fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Pool that steers traffic proportionally to node weights.
///
/// Failures down-weight a node instead of parking it in a dead queue, so a
/// flaky node keeps receiving a trickle of traffic and recovers its full
/// share the moment a request succeeds.
pub struct WeightedPool {
    connector: Arc<dyn Connector>,
    filter: NodeFilter,
    core: Mutex<WeightedCore>,
}

impl fmt::Debug for WeightedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("WeightedPool")
            .field("connections", &core.entries.len())
            .field("max_weight", &core.max_weight)
            .field("gcd", &core.gcd)
            .finish()
    }
}

impl WeightedPool {
    /// Create an empty weighted pool
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            filter: NodeFilter::default(),
            core: Mutex::new(WeightedCore {
                entries: Vec::new(),
                max_weight: 0,
                gcd: 0,
                current_weight: 0,
                index: -1,
            }),
        }
    }

    /// Set the default node filter
    #[must_use]
    pub fn with_filter(mut self, filter: NodeFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Classic GCD-based weighted round-robin over the entry list
fn select_weighted(core: &mut WeightedCore, filter: &NodeFilter) -> Option<Arc<Connection>> {
    let n = core.entries.len();
    if n == 0 {
        return None;
    }
    if !core.entries.iter().any(|e| filter.accepts(&e.connection)) {
        // Nothing passes the filter; better to answer with some node than
        // none at all
        return core.entries.first().map(|e| e.connection.clone());
    }

    // Once current_weight decays to the GCD every entry qualifies, so a
    // filter-passing entry is found within this bound
    let cycles = core.max_weight / core.gcd.max(1) + 1;
    let max_iterations = (n as u32).saturating_mul(cycles).saturating_add(n as u32);
    for _ in 0..max_iterations {
        core.index = (core.index + 1) % n as isize;
        if core.index == 0 {
            core.current_weight -= i64::from(core.gcd);
            if core.current_weight <= 0 {
                core.current_weight = i64::from(core.max_weight);
            }
        }
        let entry = &core.entries[core.index as usize];
        if i64::from(entry.weight) >= core.current_weight && filter.accepts(&entry.connection) {
            return Some(entry.connection.clone());
        }
    }
    core.entries.first().map(|e| e.connection.clone())
}

#[async_trait]
impl ConnectionPool for WeightedPool {
    fn add_connection(&self, node: NodeConfig) -> TransportResult<Arc<Connection>> {
        let id = node.resolved_id();
        let weight = node.weight.unwrap_or(DEFAULT_NODE_WEIGHT).max(1);
        let mut core = self.core.lock();
        if let Some(entry) = core.entries.iter().find(|e| e.connection.id() == id) {
            if entry.connection.url() == &node.url {
                return Ok(entry.connection.clone());
            }
            return Err(TransportError::Configuration(format!(
                "connection with id {id} already exists with a different address"
            )));
        }
        let connection = Arc::new(Connection::new(node, self.connector.clone()));
        core.entries.push(WeightedEntry {
            connection: connection.clone(),
            weight,
            ceiling: weight,
        });
        core.recompute();
        Ok(connection)
    }

    fn remove_connection(&self, id: &str) -> bool {
        let removed = {
            let mut core = self.core.lock();
            let position = core.entries.iter().position(|e| e.connection.id() == id);
            let removed = position.map(|i| core.entries.remove(i));
            if removed.is_some() {
                core.recompute();
                core.reset_selection();
            }
            removed
        };
        match removed {
            Some(entry) => {
                close_in_background(entry.connection);
                true
            }
            None => false,
        }
    }

    fn update(&self, nodes: Vec<NodeConfig>) -> TransportResult<()> {
        let mut removed = Vec::new();
        {
            let mut core = self.core.lock();
            let mut existing: HashMap<String, WeightedEntry> = core
                .entries
                .drain(..)
                .map(|e| (e.connection.id().to_string(), e))
                .collect();

            let mut incoming = HashSet::with_capacity(nodes.len());
            let mut next = Vec::with_capacity(nodes.len());
            for node in nodes {
                let id = node.resolved_id();
                if !incoming.insert(id.clone()) {
                    continue;
                }
                if let Some(entry) = existing.remove(&id) {
                    next.push(entry);
                } else {
                    let weight = node.weight.unwrap_or(DEFAULT_NODE_WEIGHT).max(1);
                    next.push(WeightedEntry {
                        connection: Arc::new(Connection::new(node, self.connector.clone())),
                        weight,
                        ceiling: weight,
                    });
                }
            }

            removed.extend(existing.into_values().map(|e| e.connection));
            core.entries = next;
            core.recompute();
            core.reset_selection();
        }

        for connection in removed {
            debug!(id = connection.id(), "removing connection after update");
            close_in_background(connection);
        }
        Ok(())
    }

    fn mark_dead(&self, connection: &Arc<Connection>, now_ms: u64) {
        let mut core = self.core.lock();
        let Some(entry) = core
            .entries
            .iter_mut()
            .find(|e| e.connection.id() == connection.id())
        else {
            return;
        };
        connection.set_status_dead(now_ms);
        // Down-weight by a quarter of the ceiling per failure, floored at 1
        // so the node still sees occasional probe traffic
        let step = (entry.ceiling / 4).max(1);
        entry.weight = entry.weight.saturating_sub(step).max(1);
        core.recompute();
    }

    fn mark_alive(&self, connection: &Arc<Connection>) {
        let mut core = self.core.lock();
        let Some(entry) = core
            .entries
            .iter_mut()
            .find(|e| e.connection.id() == connection.id())
        else {
            return;
        };
        connection.set_status_alive();
        entry.weight = entry.ceiling;
        core.recompute();
    }

    async fn get_connection(&self, ctx: &SelectionContext) -> Option<Arc<Connection>> {
        let mut core = self.core.lock();
        let filter = ctx.filter.as_ref().unwrap_or(&self.filter);
        select_weighted(&mut core, filter)
    }

    async fn empty(&self) {
        let entries = {
            let mut core = self.core.lock();
            core.reset_selection();
            let entries = std::mem::take(&mut core.entries);
            core.recompute();
            entries
        };
        futures::future::join_all(entries.iter().map(|e| e.connection.close(false))).await;
    }

    fn connections(&self) -> Vec<Arc<Connection>> {
        self.core
            .lock()
            .entries
            .iter()
            .map(|e| e.connection.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// CloudPool
// ---------------------------------------------------------------------------

/// Pool for hosted deployments that expose a single load-balanced endpoint.
///
/// There is exactly one connection and nothing else to fail over to, so it is
/// returned regardless of health; the counters are still tracked for
/// diagnostics.
pub struct CloudPool {
    connector: Arc<dyn Connector>,
    cloud: Mutex<Option<Arc<Connection>>>,
}

impl fmt::Debug for CloudPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudPool")
            .field("connected", &self.cloud.lock().is_some())
            .finish()
    }
}

impl CloudPool {
    /// Create an empty cloud pool
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            cloud: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ConnectionPool for CloudPool {
    fn add_connection(&self, node: NodeConfig) -> TransportResult<Arc<Connection>> {
        let mut cloud = self.cloud.lock();
        if let Some(existing) = cloud.as_ref() {
            if existing.url() == &node.url {
                return Ok(existing.clone());
            }
            return Err(TransportError::Configuration(
                "cloud pool already holds a connection to a different address".to_string(),
            ));
        }
        let connection = Arc::new(Connection::new(node, self.connector.clone()));
        *cloud = Some(connection.clone());
        Ok(connection)
    }

    fn remove_connection(&self, id: &str) -> bool {
        let mut cloud = self.cloud.lock();
        if cloud.as_ref().is_some_and(|c| c.id() == id) {
            if let Some(connection) = cloud.take() {
                close_in_background(connection);
            }
            return true;
        }
        false
    }

    fn update(&self, nodes: Vec<NodeConfig>) -> TransportResult<()> {
        // A hosted endpoint is not subject to topology changes; only the
        // first node of the desired set is meaningful
        let Some(node) = nodes.into_iter().next() else {
            if let Some(connection) = self.cloud.lock().take() {
                close_in_background(connection);
            }
            return Ok(());
        };
        let mut cloud = self.cloud.lock();
        match cloud.as_ref() {
            Some(existing) if existing.url() == &node.url => Ok(()),
            _ => {
                let previous = cloud.replace(Arc::new(Connection::new(
                    node,
                    self.connector.clone(),
                )));
                drop(cloud);
                if let Some(connection) = previous {
                    close_in_background(connection);
                }
                Ok(())
            }
        }
    }

    fn mark_dead(&self, connection: &Arc<Connection>, now_ms: u64) {
        let cloud = self.cloud.lock();
        if cloud.as_ref().is_some_and(|c| c.id() == connection.id()) {
            connection.set_status_dead(now_ms);
            warn!(id = connection.id(), "cloud connection marked dead");
        }
    }

    fn mark_alive(&self, connection: &Arc<Connection>) {
        let cloud = self.cloud.lock();
        if cloud.as_ref().is_some_and(|c| c.id() == connection.id()) {
            connection.set_status_alive();
        }
    }

    async fn get_connection(&self, _ctx: &SelectionContext) -> Option<Arc<Connection>> {
        self.cloud.lock().clone()
    }

    async fn empty(&self) {
        let connection = self.cloud.lock().take();
        if let Some(connection) = connection {
            connection.close(false).await;
        }
    }

    fn connections(&self) -> Vec<Arc<Connection>> {
        self.cloud.lock().iter().cloned().collect()
    }
}
