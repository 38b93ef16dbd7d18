// Adapters layer: concrete document sources behind the `DocumentSource` port.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreClient;
pub use memory::MemorySource;
