pub mod error;
pub mod generic;
pub mod memory;
pub mod persistence_manager;
pub mod traits;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use persistence_manager::PersistenceManager;
pub use traits::Backend;
