//! Session store adapters.

mod memory;
mod sqlite;

pub use memory::InMemorySessionStore;
pub use sqlite::{SqliteSessionStore, DEFAULT_RETENTION};
