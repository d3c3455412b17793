//! OData protocol engine
//!
//! Layers, bottom-up: the resolved metadata model, payload codecs, request
//! construction, transports, batches, and the change-tracking context.
//! [`client::ODataClient`] wires them together for one service.

pub mod client;
pub mod codec;
pub mod constants;
pub mod context;
pub mod error;
pub mod metadata;
pub mod operations;
pub mod request;
pub mod transport;

pub use client::ODataClient;
pub use context::{EntityContext, EntityProxy, FlushMode};
pub use error::ClientError;
pub use metadata::MetadataModel;
