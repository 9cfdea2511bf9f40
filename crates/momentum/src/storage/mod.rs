//! Adapters implementing the event, user, and score collaborator traits.

mod memory;
mod sqlite;

pub use memory::InMemoryMomentumStore;
pub use sqlite::SqliteMomentumStore;
