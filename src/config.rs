//! Transport construction and validation.
//!
//! All setup mistakes surface here as [`TransportError::Configuration`]
//! before any request is attempted; once [`TransportBuilder::build`]
//! succeeds the transport will not fail for setup reasons.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::connection::{Connector, NodeConfig};
use crate::errors::{TransportError, TransportResult};
use crate::events::Diagnostic;
use crate::pool::{CloudPool, ClusterPool, ConnectionPool, ResurrectStrategy, WeightedPool};
use crate::selector::{NodeFilter, NodeSelector};
use crate::serializer::{JsonSerializer, Serializer};
use crate::transport::{
    DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_TIMEOUT, RequestIdGenerator, Sniffer, Transport,
    TransportParts,
};

/// Which pool variant the builder should construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum PoolKind {
    #[default]
    Cluster,
    Weighted,
    Cloud,
}

/// Builder for [`Transport`].
///
/// Only the connector and at least one node are required; everything else
/// has defaults matching a typical single-cluster deployment.
pub struct TransportBuilder {
    connector: Arc<dyn Connector>,
    nodes: Vec<NodeConfig>,
    pool_kind: PoolKind,
    pool: Option<Arc<dyn ConnectionPool>>,
    resurrect_strategy: ResurrectStrategy,
    filter: Option<NodeFilter>,
    selector: Option<NodeSelector>,
    serializer: Arc<dyn Serializer>,
    diagnostic: Option<Arc<Diagnostic>>,
    name: String,
    max_retries: u32,
    request_timeout: Duration,
    compression: bool,
    headers: HashMap<String, String>,
    context: Option<Value>,
    opaque_id_prefix: Option<String>,
    generate_request_id: Option<RequestIdGenerator>,
    sniffer: Option<Arc<dyn Sniffer>>,
    sniff_interval: Option<Duration>,
    sniff_on_start: bool,
    sniff_on_connection_fault: bool,
}

impl std::fmt::Debug for TransportBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportBuilder")
            .field("nodes", &self.nodes.len())
            .field("pool_kind", &self.pool_kind)
            .field("name", &self.name)
            .field("max_retries", &self.max_retries)
            .field("request_timeout", &self.request_timeout)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

impl TransportBuilder {
    /// Start a builder with the wire-level connector to use
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            nodes: Vec::new(),
            pool_kind: PoolKind::default(),
            pool: None,
            resurrect_strategy: ResurrectStrategy::default(),
            filter: None,
            selector: None,
            serializer: Arc::new(JsonSerializer),
            diagnostic: None,
            name: "clusterlink".to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            compression: false,
            headers: HashMap::new(),
            context: None,
            opaque_id_prefix: None,
            generate_request_id: None,
            sniffer: None,
            sniff_interval: None,
            sniff_on_start: false,
            sniff_on_connection_fault: false,
        }
    }

    /// Add a node by address
    pub fn node(mut self, address: &str) -> TransportResult<Self> {
        self.nodes.push(NodeConfig::parse(address)?);
        Ok(self)
    }

    /// Add a node from a full description
    #[must_use]
    pub fn node_config(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add several node descriptions
    #[must_use]
    pub fn nodes(mut self, nodes: impl IntoIterator<Item = NodeConfig>) -> Self {
        self.nodes.extend(nodes);
        self
    }

    /// Use the health-tracking cluster pool (the default)
    #[must_use]
    pub const fn cluster_pool(mut self) -> Self {
        self.pool_kind = PoolKind::Cluster;
        self
    }

    /// Use the weighted pool
    #[must_use]
    pub const fn weighted_pool(mut self) -> Self {
        self.pool_kind = PoolKind::Weighted;
        self
    }

    /// Use the single-endpoint cloud pool
    #[must_use]
    pub const fn cloud_pool(mut self) -> Self {
        self.pool_kind = PoolKind::Cloud;
        self
    }

    /// Use a caller-supplied pool instead of building one
    #[must_use]
    pub fn pool(mut self, pool: Arc<dyn ConnectionPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Resurrection strategy for the cluster pool
    #[must_use]
    pub const fn resurrect_strategy(mut self, strategy: ResurrectStrategy) -> Self {
        self.resurrect_strategy = strategy;
        self
    }

    /// Node filter applied to every selection
    #[must_use]
    pub fn filter(mut self, filter: NodeFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Selection strategy applied to the filtered node set
    #[must_use]
    pub fn selector(mut self, selector: NodeSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Replace the JSON serializer
    #[must_use]
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Share an existing diagnostic bus instead of creating one
    #[must_use]
    pub fn diagnostic(mut self, diagnostic: Arc<Diagnostic>) -> Self {
        self.diagnostic = Some(diagnostic);
        self
    }

    /// Client name carried on events and request metadata
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Retries after the initial attempt (default 3)
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Per-attempt time budget (default 30s)
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Gzip request bodies and advertise gzip responses
    #[must_use]
    pub const fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Default header sent with every request
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Transport-level context merged under every request's context
    #[must_use]
    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Prefix prepended to caller-provided opaque ids
    #[must_use]
    pub fn opaque_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.opaque_id_prefix = Some(prefix.into());
        self
    }

    /// Custom request-id generator, replacing the counter
    #[must_use]
    pub fn generate_request_id(mut self, generator: RequestIdGenerator) -> Self {
        self.generate_request_id = Some(generator);
        self
    }

    /// Topology discovery implementation
    #[must_use]
    pub fn sniffer(mut self, sniffer: Arc<dyn Sniffer>) -> Self {
        self.sniffer = Some(sniffer);
        self
    }

    /// Sniff periodically at this interval
    #[must_use]
    pub const fn sniff_interval(mut self, interval: Duration) -> Self {
        self.sniff_interval = Some(interval);
        self
    }

    /// Sniff once right after construction
    #[must_use]
    pub const fn sniff_on_start(mut self, enabled: bool) -> Self {
        self.sniff_on_start = enabled;
        self
    }

    /// Sniff whenever a node fails at the connection level
    #[must_use]
    pub const fn sniff_on_connection_fault(mut self, enabled: bool) -> Self {
        self.sniff_on_connection_fault = enabled;
        self
    }

    /// Validate the configuration and build the transport
    pub fn build(self) -> TransportResult<Transport> {
        if self.name.is_empty() {
            return Err(TransportError::Configuration(
                "client name must not be empty".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(TransportError::Configuration(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        if self.sniff_interval.is_some_and(|i| i.is_zero()) {
            return Err(TransportError::Configuration(
                "sniff interval must be greater than zero".to_string(),
            ));
        }
        if self.sniffer.is_none()
            && (self.sniff_interval.is_some() || self.sniff_on_start || self.sniff_on_connection_fault)
        {
            return Err(TransportError::Configuration(
                "sniffing is enabled but no sniffer is configured".to_string(),
            ));
        }
        if self.pool.is_none() && self.nodes.is_empty() {
            return Err(TransportError::Configuration(
                "at least one node is required".to_string(),
            ));
        }
        if self.pool_kind == PoolKind::Cloud && self.nodes.len() > 1 {
            return Err(TransportError::Configuration(
                "the cloud pool manages exactly one endpoint".to_string(),
            ));
        }

        let diagnostic = self.diagnostic.unwrap_or_default();
        let pool: Arc<dyn ConnectionPool> = match self.pool {
            Some(pool) => pool,
            None => match self.pool_kind {
                PoolKind::Cluster => Arc::new(
                    ClusterPool::new(self.connector.clone(), diagnostic.clone())
                        .with_resurrect_strategy(self.resurrect_strategy),
                ),
                PoolKind::Weighted => Arc::new(WeightedPool::new(self.connector.clone())),
                PoolKind::Cloud => Arc::new(CloudPool::new(self.connector.clone())),
            },
        };
        for node in self.nodes {
            pool.add_connection(node)?;
        }

        Ok(Transport::from_parts(TransportParts {
            pool,
            diagnostic,
            serializer: self.serializer,
            name: self.name,
            max_retries: self.max_retries,
            request_timeout: self.request_timeout,
            compression: self.compression,
            headers: self.headers,
            context: self.context,
            opaque_id_prefix: self.opaque_id_prefix,
            generate_request_id: self.generate_request_id,
            sniffer: self.sniffer,
            sniff_interval: self.sniff_interval,
            sniff_on_connection_fault: self.sniff_on_connection_fault,
            sniff_on_start: self.sniff_on_start,
            filter: self.filter,
            selector: self.selector,
        }))
    }
}
