pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{InMemoryKeyStore, InMemoryLogStore, InMemorySettingsStore};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
