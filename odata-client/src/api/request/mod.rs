//! Request construction: resource paths, key literals, query options and
//! the builder producing transport-ready descriptors.

pub mod builder;
pub mod key;
pub mod path;
pub mod query;

pub use builder::{RequestBuilder, RequestDescriptor, RequestKind, RequestOptions, RequestSpec, join_url};
pub use key::{key_of, key_predicate, literal, parse_entity_id, parse_key_predicate};
pub use path::{ResolvedPath, ResourcePath, Segment, Target};
pub use query::QueryOptions;
