// This is the auth module - it contains ALL the business logic for credential
// lifecycle management. Notice how this module has NO HTTP or filesystem code
// (no reqwest, no std::fs imports). It works against the two ports defined
// below, so the same manager drives the real OAuth endpoint in production and
// scripted doubles in tests.

#[path = "retry.rs"]
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use retry::{ProviderError, RetryPolicy};

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// A stored credential: the unit everything else in this crate revolves
/// around.
///
/// **Why keep `refresh_token` optional?**
/// Some grants (client-side flows, service-account minted tokens) never
/// include one. A record without a refresh token that has expired can only be
/// repaired by interactive re-consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Short-lived bearer token presented to APIs.
    pub access_token: String,

    /// Long-lived secret used to mint new access tokens, when the provider
    /// issued one.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// UTC instant after which `access_token` must not be used.
    pub expiry: DateTime<Utc>,

    /// Permission scopes granted with this credential.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl CredentialRecord {
    /// Is the access token still safe to hand out, keeping `margin` of
    /// headroom before the hard expiry?
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expiry > now + margin
    }

    /// An already-expired placeholder with nothing in it. Providers that
    /// mint tokens from out-of-band secrets (service-account keys) can
    /// refresh this into a real record.
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            access_token: String::new(),
            refresh_token: None,
            expiry: now,
            scopes: Vec::new(),
        }
    }

    /// Build a brand-new record from a grant (first consent or code
    /// exchange).
    pub fn from_grant(grant: TokenGrant, now: DateTime<Utc>) -> Self {
        Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expiry: now + Duration::seconds(grant.expires_in_secs),
            scopes: grant.scopes,
        }
    }

    /// Fold a refresh grant into this record. The refresh token is only
    /// replaced when the provider rotated it (Google omits it on routine
    /// refreshes), and scopes are carried forward when the response leaves
    /// them out.
    pub fn with_grant(&self, grant: TokenGrant, now: DateTime<Utc>) -> Self {
        Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.or_else(|| self.refresh_token.clone()),
            expiry: now + Duration::seconds(grant.expires_in_secs),
            scopes: if grant.scopes.is_empty() {
                self.scopes.clone()
            } else {
                grant.scopes
            },
        }
    }
}

/// What a token endpoint hands back on a successful grant.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_secs: i64,
    pub scopes: Vec<String>,
}

/// The complete lifecycle state machine. There is deliberately nothing
/// beyond these three states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// Access token usable as-is.
    Valid,
    /// Expired, but the provider can mint a replacement without the user.
    ExpiredRefreshable,
    /// Expired and only interactive re-consent can restore access.
    ExpiredUnrefreshable,
}

impl std::fmt::Display for CredentialState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CredentialState::Valid => "valid",
            CredentialState::ExpiredRefreshable => "expired (refreshable)",
            CredentialState::ExpiredUnrefreshable => "expired (reauth required)",
        };
        f.write_str(label)
    }
}

// ============================================================================
// ERRORS
// ============================================================================
// We define our own error types rather than using generic errors.
// The key distinction the whole crate hangs on: `ReauthRequired` is not a
// retryable failure, it is a request for a human.

#[derive(Debug, Error)]
pub enum AuthError {
    /// Only interactive user consent can restore access. Never produced for
    /// transient conditions.
    #[error("credential '{id}' requires interactive re-authorization: {reason}")]
    ReauthRequired { id: String, reason: String },

    /// Transient failures exhausted the configured retry budget.
    #[error("refresh of '{id}' failed after {attempts} attempt(s): {last_error}")]
    RefreshExhausted {
        id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("credential storage error: {0}")]
    Storage(String),
}

// ============================================================================
// PORTS
// ============================================================================
// The core defines WHAT it needs, but not HOW it's implemented.
// The infra layer provides the actual implementations (file store, OAuth
// endpoint client, service-account signer).

/// Trait for persisting credential records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load a record by id. `Ok(None)` means no credential has been stored
    /// under that id yet.
    async fn load(&self, id: &str) -> Result<Option<CredentialRecord>, AuthError>;

    /// Overwrite the record for `id`. Implementations that write to disk
    /// must keep a backup of the previous contents.
    async fn save(&self, id: &str, record: &CredentialRecord) -> Result<(), AuthError>;

    /// Remove the record for `id` (manual re-authorization path).
    async fn delete(&self, id: &str) -> Result<(), AuthError>;

    /// All ids currently stored, in no particular order.
    async fn list_ids(&self) -> Result<Vec<String>, AuthError>;
}

/// Trait for talking to the token endpoint.
///
/// **Why does `refresh` take the whole record?**
/// The standard OAuth client only needs the refresh token, but the
/// service-account provider mints tokens from a signed assertion and wants
/// the scopes instead. Passing the record keeps the manager ignorant of
/// which flavor it is driving.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Mint a fresh access token for this record without user interaction.
    async fn refresh(&self, record: &CredentialRecord) -> Result<TokenGrant, ProviderError>;

    /// Exchange an interactive authorization code for an initial grant.
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError>;

    /// Can this record be refreshed without a human? Defaults to "has a
    /// refresh token"; the service-account provider overrides this to
    /// always-true.
    fn can_refresh(&self, record: &CredentialRecord) -> bool {
        record.refresh_token.is_some()
    }
}

// ============================================================================
// CREDENTIAL MANAGER
// ============================================================================
// This replaces the module-level auth singletons and the per-script
// "load file, check expiry, refresh, save file" copies. One object, passed
// explicitly to callers.

/// The refresh/retry orchestrator. Generic over its store and provider so
/// tests can inject doubles, exactly like the other services in this layout.
pub struct CredentialManager<S: CredentialStore, P: TokenProvider> {
    store: S,
    provider: P,
    policy: RetryPolicy,

    /// Headroom before the hard expiry within which we treat a token as
    /// already stale. Covers clock skew and request flight time.
    expiry_margin: Duration,

    /// Single lock around the refresh+persist critical section. Foreground
    /// callers and the background monitor both take it, so two concurrent
    /// refreshes can never race and invalidate each other's new token.
    refresh_lock: Mutex<()>,
}

impl<S: CredentialStore, P: TokenProvider> CredentialManager<S, P> {
    pub fn new(store: S, provider: P) -> Self {
        Self {
            store,
            provider,
            policy: RetryPolicy::default(),
            expiry_margin: Duration::seconds(30),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_expiry_margin(mut self, margin: Duration) -> Self {
        self.expiry_margin = margin;
        self
    }

    /// Where this record sits in the lifecycle state machine right now.
    pub fn state_of(&self, record: &CredentialRecord) -> CredentialState {
        if record.is_fresh(Utc::now(), self.expiry_margin) {
            CredentialState::Valid
        } else if self.provider.can_refresh(record) {
            CredentialState::ExpiredRefreshable
        } else {
            CredentialState::ExpiredUnrefreshable
        }
    }

    /// The whole point of this crate: return a credential that is valid
    /// right now, refreshing and persisting it if needed, or say explicitly
    /// that only a human can fix it.
    pub async fn get_valid_credential(&self, id: &str) -> Result<CredentialRecord, AuthError> {
        self.valid_or_refresh(id, self.expiry_margin).await
    }

    /// Like `get_valid_credential` but with a caller-chosen freshness
    /// horizon. The background monitor uses this to refresh ahead of need.
    pub async fn ensure_fresh(
        &self,
        id: &str,
        horizon: Duration,
    ) -> Result<CredentialRecord, AuthError> {
        self.valid_or_refresh(id, horizon.max(self.expiry_margin))
            .await
    }

    async fn valid_or_refresh(
        &self,
        id: &str,
        margin: Duration,
    ) -> Result<CredentialRecord, AuthError> {
        // Fast path: no lock needed to hand out a token that is still fresh.
        if let Some(record) = self.store.load(id).await? {
            if record.is_fresh(Utc::now(), margin) {
                return Ok(record);
            }
        }

        // Slow path. Re-read under the lock: a concurrent caller may have
        // refreshed while we waited, in which case we must return its result
        // instead of burning a second refresh.
        let _guard = self.refresh_lock.lock().await;
        let record = match self.store.load(id).await? {
            Some(record) => record,
            // Nothing stored yet. A provider that mints tokens from an
            // out-of-band secret (service-account key) can still bootstrap
            // a record here; for everyone else this needs a human.
            None => {
                let seed = CredentialRecord::empty(Utc::now());
                if self.provider.can_refresh(&seed) {
                    return self.refresh_and_persist(id, &seed).await;
                }
                return Err(AuthError::ReauthRequired {
                    id: id.to_string(),
                    reason: "no stored credential".to_string(),
                });
            }
        };

        if record.is_fresh(Utc::now(), margin) {
            return Ok(record);
        }

        if !self.provider.can_refresh(&record) {
            return Err(AuthError::ReauthRequired {
                id: id.to_string(),
                reason: "no refresh token on record".to_string(),
            });
        }

        self.refresh_and_persist(id, &record).await
    }

    /// One refresh cycle: call the provider (with classified retries),
    /// persist the updated record, hand it back. Caller holds the lock.
    async fn refresh_and_persist(
        &self,
        id: &str,
        record: &CredentialRecord,
    ) -> Result<CredentialRecord, AuthError> {
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_attempts {
            match self.provider.refresh(record).await {
                Ok(grant) => {
                    let updated = record.with_grant(grant, Utc::now());
                    self.store.save(id, &updated).await?;
                    tracing::info!(
                        credential = id,
                        expiry = %updated.expiry,
                        "access token refreshed"
                    );
                    return Ok(updated);
                }
                Err(err @ ProviderError::PermanentAuth(_)) => {
                    // Revoked consent / invalid grant. Retrying cannot help,
                    // so surface the distinct reauth condition immediately.
                    tracing::warn!(credential = id, error = %err, "refresh permanently rejected");
                    return Err(AuthError::ReauthRequired {
                        id: id.to_string(),
                        reason: err.to_string(),
                    });
                }
                Err(ProviderError::Transient(msg)) => {
                    last_error = msg;
                    if attempt < self.policy.max_attempts {
                        let delay = self.policy.delay_for(attempt);
                        tracing::warn!(
                            credential = id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %last_error,
                            "transient refresh failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(AuthError::RefreshExhausted {
            id: id.to_string(),
            attempts: self.policy.max_attempts,
            last_error,
        })
    }

    /// Store the result of an interactive code exchange as a new record.
    pub async fn install_grant(
        &self,
        id: &str,
        grant: TokenGrant,
    ) -> Result<CredentialRecord, AuthError> {
        let _guard = self.refresh_lock.lock().await;
        let record = CredentialRecord::from_grant(grant, Utc::now());
        self.store.save(id, &record).await?;
        tracing::info!(credential = id, expiry = %record.expiry, "credential installed");
        Ok(record)
    }

    /// Read a record without triggering a refresh (status display).
    pub async fn peek(&self, id: &str) -> Result<Option<CredentialRecord>, AuthError> {
        self.store.load(id).await
    }

    pub async fn list_ids(&self) -> Result<Vec<String>, AuthError> {
        self.store.list_ids().await
    }

    /// Drop the stored record; the only way back afterwards is `install_grant`.
    pub async fn forget(&self, id: &str) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;
        self.store.delete(id).await
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}
