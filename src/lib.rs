//! # clusterlink
//!
//! Cluster-aware HTTP client transport: connection pooling with node health
//! tracking, request orchestration with retries, and typed diagnostics.
//!
//! The crate is the connection-management core of a client talking to a
//! cluster of interchangeable nodes. It owns everything between "the caller
//! wants this API call made" and "bytes go on the wire": body serialization
//! and gzip, node selection, the retry loop with its health side-effects,
//! response decoding, and a typed event bus for observability. The wire
//! itself lives behind the [`Connector`](connection::Connector) seam, and
//! topology discovery behind [`Sniffer`](transport::Sniffer).
//!
//! ## Module Organization
//!
//! ```text
//! clusterlink/
//! ├── transport/      # Request orchestration and retry loop
//! ├── pool/           # Cluster, weighted, and cloud connection pools
//! ├── connection/     # Node handles, health counters, the wire seam
//! ├── selector/       # Node filters and selection strategies
//! ├── events/         # Typed diagnostic event bus
//! ├── serializer/     # Body and querystring serialization
//! ├── compression/    # Gzip for buffered and streamed bodies
//! ├── config/         # Transport builder and validation
//! └── errors/         # Closed error taxonomy
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use clusterlink::{Request, RequestOptions, TransportBuilder};
//! # use clusterlink::connection::{Connection, Connector, RawResponse, RequestParams};
//! # use clusterlink::TransportResult;
//! # #[derive(Debug)]
//! # struct MyConnector;
//! # #[async_trait::async_trait]
//! # impl Connector for MyConnector {
//! #     async fn request(
//! #         &self,
//! #         _connection: &Connection,
//! #         _params: RequestParams,
//! #         _cancel: &tokio_util::sync::CancellationToken,
//! #     ) -> TransportResult<RawResponse> {
//! #         unimplemented!()
//! #     }
//! # }
//!
//! # async fn run() -> TransportResult<()> {
//! let transport = TransportBuilder::new(Arc::new(MyConnector))
//!     .node("http://node1:9200")?
//!     .node("http://node2:9200")?
//!     .compression(true)
//!     .build()?;
//!
//! let response = transport
//!     .request(Request::get("/_cluster/health"), RequestOptions::default())
//!     .await?;
//! println!("{}", response.status);
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_panics_doc
)]

pub mod compression;
pub mod config;
pub mod connection;
pub mod errors;
pub mod events;
pub mod pool;
pub mod selector;
pub mod serializer;
pub mod transport;

pub use config::TransportBuilder;
pub use connection::{Connection, Connector, NodeConfig, NodeRoles, NodeStatus, RawResponse};
pub use errors::{TransportError, TransportResult};
pub use events::{Diagnostic, DiagnosticEvent, DiagnosticKind};
pub use pool::{
    CloudPool, ClusterPool, ConnectionPool, ResurrectStrategy, SelectionContext, WeightedPool,
};
pub use selector::{NodeFilter, NodeSelector};
pub use serializer::{JsonSerializer, Serializer};
pub use transport::{
    Body, HttpResponse, Request, RequestMeta, RequestOptions, ResponseBody, SniffReason, Sniffer,
    Transport,
};
