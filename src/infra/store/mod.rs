// Credential store implementations.

pub mod file_store;
pub mod in_memory;

// Re-export for convenience. The in-memory store is not re-exported; the
// test suites that want it import it by module path.
pub use file_store::FileCredentialStore;
