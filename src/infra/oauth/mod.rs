// Token provider implementations.

pub mod google_token_client;
pub mod service_account;

// Re-export for convenience
pub use google_token_client::{GoogleTokenClient, OAuthClientConfig};
pub use service_account::ServiceAccountProvider;
