// CLI layer - the frontend adapter. Parses the command surface and turns
// manager results into console output and exit codes.

#[path = "commands.rs"]
pub mod commands;

// Re-export for convenience
pub use commands::{Cli, Commands};
