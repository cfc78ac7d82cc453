// Command definitions and runners. Each runner returns a process exit code
// rather than calling exit() itself, so they stay testable and main keeps
// control of process teardown.
//
// Exit codes are part of the contract with the calling scripts:
//   0 - success
//   1 - failure (storage, exhausted retries, bad input)
//   3 - ReauthRequired: only interactive re-consent can fix this credential

use std::io::Write;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use clap::{Parser, Subcommand};

use crate::core::auth::{AuthError, CredentialManager, CredentialStore, TokenProvider};
use crate::core::monitor::RefreshMonitor;
use crate::infra::oauth::GoogleTokenClient;

/// Exit code signalling that interactive re-consent is required.
pub const EXIT_REAUTH_REQUIRED: i32 = 3;

#[derive(Parser)]
#[clap(
    name = "tokenkeeper",
    version,
    about = "Credential lifecycle manager: stores OAuth tokens, refreshes them before use, and tells you when only a human can fix things"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the interactive consent flow and store the resulting credential
    Login {
        /// Name for the new credential (becomes the token file name)
        id: String,
        /// Scopes to request, comma-separated (overrides TOKENKEEPER_SCOPES)
        #[clap(long, value_delimiter = ',')]
        scopes: Vec<String>,
    },
    /// Print a valid access token for a stored credential, refreshing if needed
    Token {
        id: String,
    },
    /// Show the lifecycle state of stored credentials
    Status {
        id: Option<String>,
    },
    /// Run the proactive refresh monitor in the foreground
    Watch,
    /// Delete a stored credential (and its backup) from disk
    Forget {
        id: String,
    },
}

impl Commands {
    /// Does this command (potentially) talk to the token endpoint? `status`
    /// and `forget` are offline and must work without client credentials
    /// configured.
    pub fn needs_oauth_endpoint(&self) -> bool {
        matches!(
            self,
            Commands::Login { .. } | Commands::Token { .. } | Commands::Watch
        )
    }
}

pub async fn run_token<S, P>(manager: &CredentialManager<S, P>, id: &str) -> i32
where
    S: CredentialStore,
    P: TokenProvider,
{
    match manager.get_valid_credential(id).await {
        Ok(record) => {
            println!("{}", record.access_token);
            0
        }
        Err(err @ AuthError::ReauthRequired { .. }) => {
            eprintln!("{err}");
            eprintln!("Run `tokenkeeper login {id}` to re-authorize.");
            EXIT_REAUTH_REQUIRED
        }
        Err(err) => {
            eprintln!("{err}");
            1
        }
    }
}

pub async fn run_status<S, P>(manager: &CredentialManager<S, P>, id: Option<&str>) -> i32
where
    S: CredentialStore,
    P: TokenProvider,
{
    let ids = match id {
        Some(id) => vec![id.to_string()],
        None => match manager.list_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                eprintln!("{err}");
                return 1;
            }
        },
    };

    if ids.is_empty() {
        println!("No credentials stored yet. Start with `tokenkeeper login <id>`.");
        return 0;
    }

    let mut code = 0;
    for id in ids {
        match manager.peek(&id).await {
            Ok(Some(record)) => {
                println!(
                    "{id}: {} (expires {})",
                    manager.state_of(&record),
                    record.expiry.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            Ok(None) => {
                eprintln!("{id}: not found");
                code = 1;
            }
            Err(err) => {
                eprintln!("{id}: {err}");
                code = 1;
            }
        }
    }
    code
}

pub async fn run_forget<S, P>(manager: &CredentialManager<S, P>, id: &str) -> i32
where
    S: CredentialStore,
    P: TokenProvider,
{
    match manager.forget(id).await {
        Ok(()) => {
            println!("Forgot credential '{id}'.");
            0
        }
        Err(err) => {
            eprintln!("{err}");
            1
        }
    }
}

/// Foreground monitor loop: sweep, report, sleep, repeat. Runs until the
/// process is killed; there is deliberately no fancier shutdown than that.
pub async fn run_watch<S, P>(
    manager: Arc<CredentialManager<S, P>>,
    window: Duration,
    interval: StdDuration,
) -> i32
where
    S: CredentialStore,
    P: TokenProvider,
{
    let monitor = RefreshMonitor::new(manager, window);
    tracing::info!(
        window_secs = window.num_seconds(),
        interval_secs = interval.as_secs(),
        "refresh monitor started"
    );

    loop {
        match monitor.sweep().await {
            Ok(report) => {
                if report.is_quiet() {
                    tracing::debug!(healthy = report.untouched.len(), "sweep: nothing to do");
                } else {
                    tracing::info!(
                        refreshed = ?report.refreshed,
                        needs_reauth = ?report.needs_reauth,
                        failed = ?report.failed,
                        "sweep finished"
                    );
                }
            }
            Err(err) => tracing::error!(error = %err, "sweep aborted"),
        }

        tokio::time::sleep(interval).await;
    }
}

/// Interactive consent: print the URL, wait for the pasted code, exchange
/// and persist. Only meaningful with the user-OAuth provider, hence the
/// concrete type.
pub async fn run_login<S>(manager: &CredentialManager<S, GoogleTokenClient>, id: &str) -> i32
where
    S: CredentialStore,
{
    let consent_url = match manager.provider().consent_url() {
        Ok(url) => url,
        Err(err) => {
            eprintln!("Cannot build the consent URL: {err}");
            return 1;
        }
    };

    println!("Open this URL in a browser and authorize access:");
    println!();
    println!("  {consent_url}");
    println!();
    print!("Paste the authorization code here: ");
    let _ = std::io::stdout().flush();

    let mut code = String::new();
    if std::io::stdin().read_line(&mut code).is_err() {
        eprintln!("Failed to read the authorization code from stdin.");
        return 1;
    }
    let code = code.trim();
    if code.is_empty() {
        eprintln!("No authorization code entered.");
        return 1;
    }

    match manager.provider().exchange_code(code).await {
        Ok(grant) => {
            if grant.refresh_token.is_none() {
                // Without one, the credential dies at first expiry.
                tracing::warn!(
                    credential = id,
                    "provider returned no refresh token; token will not be renewable"
                );
            }
            match manager.install_grant(id, grant).await {
                Ok(record) => {
                    println!(
                        "Stored credential '{id}' (expires {}).",
                        record.expiry.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                    0
                }
                Err(err) => {
                    eprintln!("{err}");
                    1
                }
            }
        }
        Err(err) => {
            eprintln!("Code exchange failed: {err}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_commands_do_not_need_client_credentials() {
        let status = Commands::Status { id: None };
        let forget = Commands::Forget {
            id: "blog".to_string(),
        };
        assert!(!status.needs_oauth_endpoint());
        assert!(!forget.needs_oauth_endpoint());
    }

    #[test]
    fn network_commands_need_client_credentials() {
        let login = Commands::Login {
            id: "blog".to_string(),
            scopes: vec![],
        };
        let token = Commands::Token {
            id: "blog".to_string(),
        };
        assert!(login.needs_oauth_endpoint());
        assert!(token.needs_oauth_endpoint());
        assert!(Commands::Watch.needs_oauth_endpoint());
    }
}
