// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Token service: per-provider, per-organization credential issuance.
//!
//! Reads go straight to the installation row. A token inside the refresh
//! skew triggers a provider refresh, serialized per installation: one
//! refresh in flight, every other caller awaits its outcome through the
//! same per-key mutex and then re-reads the row.

use async_trait::async_trait;
use gantry_core::{Backoff, Clock, Installation, InstallationId, OrgId, Provider, Secret, Token};
use gantry_store::{Store, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Outcome of a provider-side refresh call.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access: Secret,
    pub refresh: Option<Secret>,
    pub expires_at_ms: Option<u64>,
}

#[derive(Debug, Error)]
pub enum RefreshError {
    /// The provider rejected the refresh grant; the installation is dead.
    #[error("refresh rejected: {0}")]
    Unauthorized(String),
    /// Network or 5xx; retried with backoff.
    #[error("refresh transient: {0}")]
    Transient(String),
}

/// The narrow seam to the provider's OAuth endpoint.
#[async_trait]
pub trait TokenRefresher: Send + Sync + 'static {
    async fn refresh(&self, installation: &Installation) -> Result<RefreshedToken, RefreshError>;
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("no active installation")]
    NotFound,
    /// Refresh rejected; the installation has been marked inactive.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("refresh failed: {0}")]
    Transient(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct TokenServiceConfig {
    /// Minimum remaining lifetime of any token handed out.
    pub skew: Duration,
    pub refresh_backoff: Backoff,
}

impl Default for TokenServiceConfig {
    fn default() -> Self {
        Self { skew: Duration::from_secs(300), refresh_backoff: Backoff::for_token_refresh() }
    }
}

pub struct TokenService<C: Clock> {
    store: Arc<Store>,
    refresher: Arc<dyn TokenRefresher>,
    clock: C,
    config: TokenServiceConfig,
    /// Per-installation refresh serialization.
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<C: Clock> TokenService<C> {
    pub fn new(
        store: Arc<Store>,
        refresher: Arc<dyn TokenRefresher>,
        clock: C,
        config: TokenServiceConfig,
    ) -> Self {
        Self { store, refresher, clock, config, refresh_locks: Mutex::new(HashMap::new()) }
    }

    /// Register a new installation. Fails with `AlreadyExists` when an
    /// active row for the (provider, organization) pair exists.
    pub fn create_installation(&self, installation: Installation) -> Result<(), StoreError> {
        self.store.create_installation(installation)
    }

    /// Mark an installation inactive and drop its credentials from use.
    pub fn revoke_installation(&self, id: InstallationId) -> Result<(), StoreError> {
        self.store.revoke_installation(id, self.clock.epoch_ms())
    }

    /// Issue a token with remaining lifetime ≥ the configured skew.
    pub async fn get_token(&self, provider: Provider, org: &OrgId) -> Result<Token, TokenError> {
        let installation = self
            .store
            .active_installation(provider, org.as_str())
            .ok_or(TokenError::NotFound)?;

        let skew_ms = self.config.skew.as_millis() as u64;
        let token = installation.token();
        if token.fresh_at(self.clock.epoch_ms(), skew_ms) {
            return Ok(token);
        }

        let lock = self.lock_for(installation.id);
        let _guard = lock.lock().await;

        // Another caller may have finished the refresh while we waited.
        let installation = self
            .store
            .active_installation(provider, org.as_str())
            .ok_or(TokenError::NotFound)?;
        let token = installation.token();
        if token.fresh_at(self.clock.epoch_ms(), skew_ms) {
            return Ok(token);
        }

        self.refresh_locked(installation).await
    }

    async fn refresh_locked(&self, installation: Installation) -> Result<Token, TokenError> {
        let backoff = self.config.refresh_backoff;
        let mut attempt = 0;
        loop {
            match self.refresher.refresh(&installation).await {
                Ok(refreshed) => {
                    self.store.update_installation_token(
                        installation.id,
                        refreshed.access.clone(),
                        refreshed.refresh.clone(),
                        refreshed.expires_at_ms,
                        self.clock.epoch_ms(),
                    )?;
                    tracing::info!(
                        installation = %installation.id,
                        provider = %installation.provider,
                        "token refreshed"
                    );
                    return Ok(Token {
                        access: refreshed.access,
                        expires_at_ms: refreshed.expires_at_ms,
                    });
                }
                Err(RefreshError::Unauthorized(reason)) => {
                    // Terminal: the grant is dead; kill the installation so
                    // callers stop trying.
                    self.store.revoke_installation(installation.id, self.clock.epoch_ms())?;
                    tracing::warn!(
                        installation = %installation.id,
                        "refresh rejected, installation deactivated"
                    );
                    return Err(TokenError::Unauthorized(reason));
                }
                Err(RefreshError::Transient(reason)) => {
                    attempt += 1;
                    if attempt >= backoff.max_attempts {
                        return Err(TokenError::Transient(reason));
                    }
                    tokio::time::sleep(backoff.delay(attempt - 1)).await;
                }
            }
        }
    }

    fn lock_for(&self, id: InstallationId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.refresh_locks.lock();
        Arc::clone(locks.entry(id.as_str().to_string()).or_default())
    }
}

/// A refresher that always returns the same token (tests, static PATs).
#[cfg(any(test, feature = "test-support"))]
pub struct StaticRefresher {
    pub token: RefreshedToken,
    pub calls: std::sync::atomic::AtomicU32,
}

#[cfg(any(test, feature = "test-support"))]
impl StaticRefresher {
    pub fn new(access: &str, expires_at_ms: Option<u64>) -> Self {
        Self {
            token: RefreshedToken {
                access: Secret::new(access),
                refresh: None,
                expires_at_ms,
            },
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl TokenRefresher for StaticRefresher {
    async fn refresh(&self, _installation: &Installation) -> Result<RefreshedToken, RefreshError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.token.clone())
    }
}

#[cfg(test)]
#[path = "tokens_tests.rs"]
mod tests;
