// This is the entry point of tokenkeeper: the shared credential lifecycle
// manager that the surrounding automation scripts call instead of each
// carrying its own "load token file, check expiry, refresh, save" copy.
//
// **Architecture Overview:**
// - `core/` = Business logic (credential state machine, refresh/retry
//   orchestration, proactive monitor) - no I/O framework types
// - `infra/` = Implementations of core traits (file/in-memory stores, OAuth
//   token-endpoint client, service-account signer)
// - `cli/` = Command-line adapter (commands, exit codes)
//
// This file's job is to:
// 1. Load configuration from the environment
// 2. Initialize services (dependency injection)
// 3. Dispatch the chosen command

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with a pile of mod.rs files that all look the same.
#[path = "cli/cli_layer.rs"]
mod cli;
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use clap::Parser;

use crate::cli::commands;
use crate::cli::{Cli, Commands};
use crate::core::auth::{CredentialManager, CredentialStore, TokenProvider};
use crate::infra::oauth::{GoogleTokenClient, OAuthClientConfig, ServiceAccountProvider};
use crate::infra::store::FileCredentialStore;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_secs(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

/// Dispatch for the commands shared by both provider modes.
async fn dispatch<S, P>(
    command: Commands,
    manager: Arc<CredentialManager<S, P>>,
    window: Duration,
    interval: StdDuration,
) -> i32
where
    S: CredentialStore + 'static,
    P: TokenProvider + 'static,
{
    match command {
        Commands::Token { id } => commands::run_token(manager.as_ref(), &id).await,
        Commands::Status { id } => commands::run_status(manager.as_ref(), id.as_deref()).await,
        Commands::Forget { id } => commands::run_forget(manager.as_ref(), &id).await,
        Commands::Watch => commands::run_watch(manager, window, interval).await,
        Commands::Login { .. } => {
            // Handled before dispatch; only the user-OAuth mode supports it.
            eprintln!("login is not available for service-account credentials");
            2
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // Keep token files in a dedicated folder so the repo root stays tidy.
    let data_dir = env_or("TOKENKEEPER_DATA_DIR", "data");
    let store = FileCredentialStore::new(&data_dir);

    // How far ahead of expiry the monitor refreshes, and how often it wakes.
    let window = Duration::seconds(env_secs("TOKENKEEPER_REFRESH_WINDOW_SECS", 300) as i64);
    let interval = StdDuration::from_secs(env_secs("TOKENKEEPER_SWEEP_INTERVAL_SECS", 60));

    // Headroom before hard expiry within which a token counts as stale.
    let margin = Duration::seconds(env_secs("TOKENKEEPER_EXPIRY_MARGIN_SECS", 30) as i64);

    let default_scopes: Vec<String> = env_or("TOKENKEEPER_SCOPES", "")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Two provider modes, chosen by configuration: a service-account key
    // switches the manager onto the jwt-bearer flow; otherwise we drive the
    // standard user-consent OAuth endpoints.

    let service_account_configured = std::env::var("GOOGLE_SERVICE_ACCOUNT_KEY").is_ok()
        || std::env::var("GOOGLE_SERVICE_ACCOUNT_JSON").is_ok();

    let code = if service_account_configured {
        let provider = match ServiceAccountProvider::from_env(default_scopes).await {
            Ok(provider) => provider,
            Err(err) => {
                eprintln!("Failed to load service account key: {err:#}");
                std::process::exit(2);
            }
        };
        let manager =
            Arc::new(CredentialManager::new(store, provider).with_expiry_margin(margin));
        dispatch(cli.command, manager, window, interval).await
    } else {
        // Client credentials are only demanded for commands that can reach
        // the token endpoint; `status` and `forget` work offline.
        let (client_id, client_secret) = if cli.command.needs_oauth_endpoint() {
            (
                std::env::var("GOOGLE_CLIENT_ID").expect(
                    "Missing GOOGLE_CLIENT_ID environment variable! Create a .env file with your OAuth client credentials.",
                ),
                std::env::var("GOOGLE_CLIENT_SECRET")
                    .expect("Missing GOOGLE_CLIENT_SECRET environment variable!"),
            )
        } else {
            (
                env_or("GOOGLE_CLIENT_ID", ""),
                env_or("GOOGLE_CLIENT_SECRET", ""),
            )
        };

        let mut config = OAuthClientConfig {
            client_id,
            client_secret,
            scopes: default_scopes,
            ..Default::default()
        };
        config.token_uri = env_or("GOOGLE_TOKEN_URI", &config.token_uri);
        config.auth_uri = env_or("GOOGLE_AUTH_URI", &config.auth_uri);
        config.redirect_uri = env_or("GOOGLE_REDIRECT_URI", &config.redirect_uri);

        // A login-time --scopes flag wins over the environment.
        if let Commands::Login { scopes, .. } = &cli.command {
            if !scopes.is_empty() {
                config.scopes = scopes.clone();
            }
        }

        let manager = Arc::new(
            CredentialManager::new(store, GoogleTokenClient::new(config))
                .with_expiry_margin(margin),
        );
        match cli.command {
            Commands::Login { id, .. } => commands::run_login(manager.as_ref(), &id).await,
            command => dispatch(command, manager, window, interval).await,
        }
    };

    std::process::exit(code);
}
