// Proactive refresh sweep. The `watch` command (and anything embedding this
// crate) runs `sweep()` on a fixed interval; each pass walks the stored
// credentials and refreshes the ones that will expire soon, so foreground
// scripts almost never pay the refresh latency themselves.
//
// The interval loop itself lives in the frontend (`watch` command); this
// module only knows how to do one pass. There are no cancellation semantics
// beyond process exit.

use std::sync::Arc;

use chrono::Duration;

use crate::core::auth::{AuthError, CredentialManager, CredentialStore, TokenProvider};

/// Outcome of one sweep, for logging and for the `watch` console output.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Ids refreshed this pass.
    pub refreshed: Vec<String>,
    /// Ids that can only be fixed by interactive re-consent.
    pub needs_reauth: Vec<String>,
    /// Ids whose refresh failed transiently even after retries.
    pub failed: Vec<String>,
    /// Ids that were still comfortably fresh.
    pub untouched: Vec<String>,
}

impl SweepReport {
    pub fn is_quiet(&self) -> bool {
        self.refreshed.is_empty() && self.needs_reauth.is_empty() && self.failed.is_empty()
    }
}

pub struct RefreshMonitor<S: CredentialStore, P: TokenProvider> {
    manager: Arc<CredentialManager<S, P>>,

    /// Refresh anything expiring within this window. Must comfortably exceed
    /// the sweep interval or tokens can expire between passes.
    window: Duration,
}

impl<S: CredentialStore, P: TokenProvider> RefreshMonitor<S, P> {
    pub fn new(manager: Arc<CredentialManager<S, P>>, window: Duration) -> Self {
        Self { manager, window }
    }

    /// Walk every stored credential once. Per-credential failures are
    /// recorded and logged but never abort the sweep - one revoked blog
    /// credential must not starve the others of refreshes.
    pub async fn sweep(&self) -> Result<SweepReport, AuthError> {
        let mut report = SweepReport::default();

        for id in self.manager.list_ids().await? {
            let before = self.manager.peek(&id).await?.map(|r| r.access_token);
            match self.manager.ensure_fresh(&id, self.window).await {
                Ok(record) => {
                    if before.as_deref() == Some(record.access_token.as_str()) {
                        report.untouched.push(id);
                    } else {
                        report.refreshed.push(id);
                    }
                }
                Err(AuthError::ReauthRequired { reason, .. }) => {
                    tracing::warn!(credential = %id, %reason, "credential needs interactive reauth");
                    report.needs_reauth.push(id);
                }
                Err(err) => {
                    tracing::error!(credential = %id, error = %err, "proactive refresh failed");
                    report.failed.push(id);
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::retry::{ProviderError, RetryPolicy};
    use crate::core::auth::{CredentialRecord, TokenGrant};
    use crate::infra::store::in_memory::InMemoryCredentialStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration as StdDuration;

    enum Outcome {
        Mint,
        RejectPermanently,
        TimeOut,
    }

    struct CountingProvider {
        calls: AtomicU32,
        outcome: Outcome,
    }

    impl CountingProvider {
        fn with(outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                outcome,
            })
        }
    }

    #[async_trait]
    impl crate::core::auth::TokenProvider for Arc<CountingProvider> {
        async fn refresh(&self, _: &CredentialRecord) -> Result<TokenGrant, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::RejectPermanently => {
                    Err(ProviderError::PermanentAuth("invalid_grant".to_string()))
                }
                Outcome::TimeOut => {
                    Err(ProviderError::Transient("connection timed out".to_string()))
                }
                Outcome::Mint => Ok(TokenGrant {
                    access_token: "swept-token".to_string(),
                    refresh_token: None,
                    expires_in_secs: 3600,
                    scopes: vec![],
                }),
            }
        }

        async fn exchange_code(&self, _: &str) -> Result<TokenGrant, ProviderError> {
            Err(ProviderError::PermanentAuth("not interactive".to_string()))
        }
    }

    fn record_expiring_in(secs: i64) -> CredentialRecord {
        CredentialRecord {
            access_token: "tok".to_string(),
            refresh_token: Some("refresh".to_string()),
            expiry: Utc::now() + Duration::seconds(secs),
            scopes: vec![],
        }
    }

    async fn monitor_with(
        records: Vec<(&str, CredentialRecord)>,
        provider: Arc<CountingProvider>,
    ) -> RefreshMonitor<InMemoryCredentialStore, Arc<CountingProvider>> {
        let store = InMemoryCredentialStore::new();
        for (id, record) in records {
            store.save(id, &record).await.unwrap();
        }
        let manager = CredentialManager::new(store, provider).with_retry_policy(RetryPolicy {
            max_attempts: 2,
            base_delay: StdDuration::from_millis(1),
            max_delay: StdDuration::from_millis(2),
        });
        RefreshMonitor::new(Arc::new(manager), Duration::seconds(300))
    }

    #[tokio::test]
    async fn sweep_refreshes_only_near_expiry_credentials() {
        let provider = CountingProvider::with(Outcome::Mint);
        let monitor = monitor_with(
            vec![
                ("soon", record_expiring_in(60)),
                ("healthy", record_expiring_in(7200)),
            ],
            Arc::clone(&provider),
        )
        .await;

        let report = monitor.sweep().await.unwrap();

        assert_eq!(report.refreshed, vec!["soon".to_string()]);
        assert_eq!(report.untouched, vec!["healthy".to_string()]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sweep_continues_past_reauth_credentials() {
        let provider = CountingProvider::with(Outcome::RejectPermanently);
        let monitor = monitor_with(
            vec![
                ("revoked", record_expiring_in(60)),
                ("healthy", record_expiring_in(7200)),
            ],
            Arc::clone(&provider),
        )
        .await;

        let report = monitor.sweep().await.unwrap();

        assert_eq!(report.needs_reauth, vec!["revoked".to_string()]);
        assert_eq!(report.untouched, vec!["healthy".to_string()]);
        assert!(report.refreshed.is_empty());
    }

    #[tokio::test]
    async fn sweep_continues_past_transient_failures() {
        let provider = CountingProvider::with(Outcome::TimeOut);
        let monitor = monitor_with(
            vec![
                ("flaky", record_expiring_in(60)),
                ("healthy", record_expiring_in(7200)),
            ],
            Arc::clone(&provider),
        )
        .await;

        let report = monitor.sweep().await.unwrap();

        // Retries exhausted on the flaky credential, yet the sweep still
        // reaches the healthy one.
        assert_eq!(report.failed, vec!["flaky".to_string()]);
        assert_eq!(report.untouched, vec!["healthy".to_string()]);
        assert!(report.refreshed.is_empty());
        assert!(report.needs_reauth.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn quiet_sweep_is_quiet() {
        let provider = CountingProvider::with(Outcome::Mint);
        let monitor = monitor_with(vec![("healthy", record_expiring_in(7200))], provider).await;

        let report = monitor.sweep().await.unwrap();
        assert!(report.is_quiet());
    }
}
