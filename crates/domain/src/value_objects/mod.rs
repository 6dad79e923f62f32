//! Value objects - Immutable objects defined by their attributes

mod schema_version;
mod versioned_state;

pub use schema_version::SchemaVersion;
pub use versioned_state::VersionedState;
