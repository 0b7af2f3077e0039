// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Repository workspace manager.
//!
//! A workspace is a checkout bound to (installation, repository, ref) with
//! exactly one concurrent mutator. Layout:
//! `WORKSPACE_ROOT/<provider>/<org>/<repo>/<ref-dir>` — one sibling
//! directory per ref, so PR work never contends with default-branch work.
//!
//! Security contract: repository names are validated before any URL is
//! built, checkouts must stay under the root (escaping symlinks are an
//! error), and credentials reach git only through the in-memory askpass
//! helper, which is wiped on release.

use async_trait::async_trait;
use gantry_adapters::git::{self, CredentialHelper, GitError};
use gantry_core::{Backoff, Clock, OrgId, Provider, Token, WorkspaceId};
use gantry_store::{Store, StoreError, WorkspaceRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Repository name or URL outside the allowlist.
    #[error("policy violation: {0}")]
    PolicyViolation(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Retryable fetch/clone flake.
    #[error("transient: {0}")]
    Transient(String),
    /// Disk quota exhausted; the task retries with backoff.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    /// Permanent git failure (missing repo, broken ref).
    #[error("workspace failed: {0}")]
    Permanent(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<GitError> for WorkspaceError {
    fn from(e: GitError) -> Self {
        match e {
            GitError::Unauthorized(m) => WorkspaceError::Unauthorized(m),
            GitError::Transient(m) => WorkspaceError::Transient(m),
            GitError::Failed(m) => WorkspaceError::Permanent(m),
            GitError::Io(e) => WorkspaceError::Io(e),
        }
    }
}

/// What a task needs checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRequest {
    pub provider: Provider,
    pub org: OrgId,
    /// `owner/name`, validated against the allowlist charset.
    pub repo: String,
    /// Branch or sha; ignored when `pr_number` is set.
    pub git_ref: String,
    /// When set, the PR merge ref is fetched and checked out.
    pub pr_number: Option<u64>,
}

/// An acquired workspace: the exclusive lock is held until release.
#[derive(Debug)]
pub struct WorkspaceLease {
    pub id: WorkspaceId,
    pub path: PathBuf,
    helper: Option<CredentialHelper>,
    _guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

#[derive(Debug, Clone)]
pub struct WorkspacesConfig {
    pub root: PathBuf,
    /// Host the checkout URLs are built for; must be allowlisted.
    pub git_host: String,
    pub allowed_hosts: Vec<String>,
    pub max_workspace_bytes: u64,
    pub max_org_bytes: u64,
    /// Idle time before a workspace is eligible for eviction.
    pub ttl: Duration,
    pub fetch_backoff: Backoff,
}

impl WorkspacesConfig {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            git_host: "github.com".into(),
            allowed_hosts: vec!["github.com".into()],
            max_workspace_bytes: 500 * 1024 * 1024,
            max_org_bytes: 10 * 1024 * 1024 * 1024,
            ttl: Duration::from_secs(24 * 3600),
            fetch_backoff: Backoff::for_outbound(),
        }
    }
}

/// Disk introspection for the health endpoint.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceStats {
    /// Live checkout count.
    pub workspaces: usize,
    /// Bytes on disk per organization, keyed `provider/org`.
    pub bytes_per_org: HashMap<String, u64>,
}

/// The seam the worker sees; the git implementation below is the real one.
#[async_trait]
pub trait Workspaces: Send + Sync + 'static {
    async fn acquire(
        &self,
        req: &WorkspaceRequest,
        token: &Token,
    ) -> Result<WorkspaceLease, WorkspaceError>;

    async fn release(&self, lease: WorkspaceLease);

    /// Evict idle workspaces without contending held locks. Returns the
    /// evicted ids.
    async fn evict(&self) -> Vec<WorkspaceId>;

    /// Count and per-org disk usage of the live checkouts.
    async fn stats(&self) -> WorkspaceStats;
}

pub struct GitWorkspaces<C: Clock> {
    config: WorkspacesConfig,
    store: Arc<Store>,
    clock: C,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<C: Clock> GitWorkspaces<C> {
    pub fn new(config: WorkspacesConfig, store: Arc<Store>, clock: C) -> Self {
        Self { config, store, clock, locks: Mutex::new(HashMap::new()) }
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    fn checkout_path(&self, req: &WorkspaceRequest) -> PathBuf {
        self.config
            .root
            .join(req.provider.as_str())
            .join(req.org.as_str())
            .join(&req.repo)
            .join(ref_dir(req))
    }

    fn repo_url(&self, repo: &str) -> Result<String, WorkspaceError> {
        let host = &self.config.git_host;
        if !self.config.allowed_hosts.iter().any(|h| h == host) {
            return Err(WorkspaceError::PolicyViolation(format!("host not allowlisted: {host}")));
        }
        Ok(format!("https://{host}/{repo}.git"))
    }

    async fn sync_checkout(
        &self,
        req: &WorkspaceRequest,
        path: &Path,
        env: &[(String, String)],
    ) -> Result<(), WorkspaceError> {
        let url = self.repo_url(&req.repo)?;

        if path.exists() && !git::is_healthy(path).await {
            // Poisoned checkout: delete and reclone.
            tracing::warn!(path = %path.display(), "poisoned workspace, recloning");
            tokio::fs::remove_dir_all(path).await?;
        }

        if !path.exists() {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let branch = if req.pr_number.is_some() { None } else { Some(req.git_ref.as_str()) };
            self.with_fetch_retries(|| git::clone_shallow(&url, branch, path, env)).await?;
        } else if req.pr_number.is_none() {
            let refspec = req.git_ref.clone();
            self.with_fetch_retries(|| git::fetch(path, &refspec, env)).await?;
            git::checkout_hard(path, "FETCH_HEAD").await?;
        }

        // PR work runs on the merge ref, whatever branch the checkout was
        // on before.
        if let Some(number) = req.pr_number {
            let local =
                self.with_fetch_retries(|| git::fetch_pr_merge_ref(path, number, env)).await?;
            git::checkout_hard(path, &local).await?;
        }

        scan_symlink_escapes(path)?;
        Ok(())
    }

    async fn with_fetch_retries<T, F, Fut>(&self, op: F) -> Result<T, WorkspaceError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, GitError>>,
    {
        let backoff = self.config.fetch_backoff;
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(GitError::Transient(reason)) => {
                    attempt += 1;
                    if attempt >= backoff.max_attempts {
                        return Err(WorkspaceError::Transient(reason));
                    }
                    tokio::time::sleep(backoff.delay(attempt - 1)).await;
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    fn quota_check(&self, req: &WorkspaceRequest, path: &Path) -> Result<(), WorkspaceError> {
        let org_dir = self.config.root.join(req.provider.as_str()).join(req.org.as_str());
        let org_bytes = dir_size(&org_dir);
        if org_bytes > self.config.max_org_bytes {
            return Err(WorkspaceError::ResourceExhausted(format!(
                "organization disk quota exceeded ({org_bytes} bytes)"
            )));
        }
        if path.exists() {
            let ws_bytes = dir_size(path);
            if ws_bytes > self.config.max_workspace_bytes {
                return Err(WorkspaceError::ResourceExhausted(format!(
                    "workspace disk quota exceeded ({ws_bytes} bytes)"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<C: Clock> Workspaces for GitWorkspaces<C> {
    async fn acquire(
        &self,
        req: &WorkspaceRequest,
        token: &Token,
    ) -> Result<WorkspaceLease, WorkspaceError> {
        validate_repo(&req.repo)?;
        let path = self.checkout_path(req);
        self.quota_check(req, &path)?;

        let key = format!("{}/{}/{}/{}", req.provider, req.org, req.repo, ref_dir(req));
        let guard = self.lock_for(&key).lock_owned().await;

        let id = existing_record_id(&self.store, &path)
            .unwrap_or_else(|| WorkspaceId::new_at(self.clock.epoch_ms()));
        let helper = CredentialHelper::create(&self.config.root.join(".helpers").join(id.as_str()))
            .await
            .map_err(WorkspaceError::from)?;
        let env = helper.env(&token.access);

        if let Err(e) = self.sync_checkout(req, &path, &env).await {
            helper.wipe().await;
            return Err(e);
        }

        // Quota is re-checked after sync; an over-quota checkout refuses
        // the acquire (and the freshly written data stays for eviction).
        let ws_bytes = dir_size(&path);
        if ws_bytes > self.config.max_workspace_bytes {
            helper.wipe().await;
            return Err(WorkspaceError::ResourceExhausted(format!(
                "workspace disk quota exceeded ({ws_bytes} bytes)"
            )));
        }

        let head = git::head_commit(&path).await.ok();
        self.store.record_workspace(WorkspaceRecord {
            id,
            provider: req.provider,
            org: req.org.clone(),
            repo: req.repo.clone(),
            git_ref: req.git_ref.clone(),
            path: path.clone(),
            head,
            last_access_ms: self.clock.epoch_ms(),
        })?;

        Ok(WorkspaceLease { id, path, helper: Some(helper), _guard: Some(guard) })
    }

    async fn release(&self, mut lease: WorkspaceLease) {
        if let Some(helper) = lease.helper.take() {
            helper.wipe().await;
        }
        let now = self.clock.epoch_ms();
        if let Some(mut record) =
            self.store.workspaces().into_iter().find(|r| r.id == lease.id)
        {
            record.last_access_ms = now;
            if let Err(e) = self.store.record_workspace(record) {
                tracing::warn!(workspace = %lease.id, "failed to update last-access: {e}");
            }
        }
        // The lock guard drops here.
    }

    async fn evict(&self) -> Vec<WorkspaceId> {
        let now = self.clock.epoch_ms();
        let ttl_ms = self.config.ttl.as_millis() as u64;
        let mut evicted = Vec::new();

        for record in self.store.workspaces() {
            if record.last_access_ms + ttl_ms > now {
                continue;
            }
            let key = format!(
                "{}/{}/{}/{}",
                record.provider,
                record.org,
                record.repo,
                record.path.file_name().map(|s| s.to_string_lossy()).unwrap_or_default()
            );
            // Never contend a held lock; a busy workspace is not idle.
            let lock = self.lock_for(&key);
            let Ok(_guard) = lock.try_lock() else { continue };

            if record.path.starts_with(&self.config.root) && record.path.exists() {
                if let Err(e) = tokio::fs::remove_dir_all(&record.path).await {
                    tracing::warn!(path = %record.path.display(), "evict failed: {e}");
                    continue;
                }
            }
            if let Err(e) = self.store.evict_workspace(record.id) {
                tracing::warn!(workspace = %record.id, "evict record failed: {e}");
                continue;
            }
            tracing::info!(workspace = %record.id, path = %record.path.display(), "evicted");
            evicted.push(record.id);
        }
        evicted
    }

    async fn stats(&self) -> WorkspaceStats {
        let records = self.store.workspaces();
        let mut bytes_per_org: HashMap<String, u64> = HashMap::new();
        for record in &records {
            let key = format!("{}/{}", record.provider, record.org);
            if !bytes_per_org.contains_key(&key) {
                let org_dir =
                    self.config.root.join(record.provider.as_str()).join(record.org.as_str());
                bytes_per_org.insert(key, dir_size(&org_dir));
            }
        }
        WorkspaceStats { workspaces: records.len(), bytes_per_org }
    }
}

fn existing_record_id(store: &Store, path: &Path) -> Option<WorkspaceId> {
    store.workspaces().into_iter().find(|r| r.path == path).map(|r| r.id)
}

/// Validate an `owner/name` repository identifier.
///
/// Exactly two segments of `[A-Za-z0-9._-]`, no leading dots, and a
/// trailing `.git` on the name is tolerated. Everything else is a policy
/// violation — the name is about to be embedded in a URL.
pub fn validate_repo(repo: &str) -> Result<(), WorkspaceError> {
    let mut parts = repo.split('/');
    let (owner, name) = match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) => (owner, name.trim_end_matches(".git")),
        _ => {
            return Err(WorkspaceError::PolicyViolation(format!(
                "repository must be owner/name: {repo:?}"
            )))
        }
    };
    for segment in [owner, name] {
        let valid = !segment.is_empty()
            && !segment.starts_with('.')
            && segment.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(WorkspaceError::PolicyViolation(format!(
                "invalid repository segment: {segment:?}"
            )));
        }
    }
    Ok(())
}

/// Directory name for a ref: `pr-<n>` for pull requests, the sanitized
/// ref otherwise.
pub fn ref_dir(req: &WorkspaceRequest) -> String {
    if let Some(number) = req.pr_number {
        return format!("pr-{number}");
    }
    let sanitized: String = req
        .git_ref
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '-' })
        .collect();
    if sanitized.is_empty() {
        "default".to_string()
    } else {
        sanitized
    }
}

/// Recursive directory size without following symlinks.
pub fn dir_size(path: &Path) -> u64 {
    let mut total = 0;
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else { continue };
            if meta.is_symlink() {
                continue;
            } else if meta.is_dir() {
                stack.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }
    total
}

/// Reject checkouts containing symlinks that resolve outside themselves.
fn scan_symlink_escapes(root: &Path) -> Result<(), WorkspaceError> {
    let canonical_root = root.canonicalize()?;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = std::fs::symlink_metadata(&path) else { continue };
            if meta.is_symlink() {
                match path.canonicalize() {
                    Ok(target) if target.starts_with(&canonical_root) => {}
                    // Dangling links cannot escape; resolvable ones must
                    // stay inside the checkout.
                    Err(_) => {}
                    Ok(target) => {
                        return Err(WorkspaceError::PolicyViolation(format!(
                            "symlink escapes workspace: {} -> {}",
                            path.display(),
                            target.display()
                        )));
                    }
                }
            } else if meta.is_dir() {
                stack.push(path);
            }
        }
    }
    Ok(())
}

/// In-memory workspaces for tests and remote-only deployments: a plain
/// directory per request, no git, no quotas.
#[cfg(any(test, feature = "test-support"))]
pub struct FakeWorkspaces {
    pub root: PathBuf,
    pub acquires: std::sync::atomic::AtomicU32,
    pub releases: std::sync::atomic::AtomicU32,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeWorkspaces {
    pub fn new(root: PathBuf) -> Self {
        Self { root, acquires: Default::default(), releases: Default::default() }
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl Workspaces for FakeWorkspaces {
    async fn acquire(
        &self,
        req: &WorkspaceRequest,
        _token: &Token,
    ) -> Result<WorkspaceLease, WorkspaceError> {
        self.acquires.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let path = self.root.join(req.org.as_str()).join(req.repo.replace('/', "-"));
        tokio::fs::create_dir_all(&path).await?;
        Ok(WorkspaceLease { id: WorkspaceId::new_at(0), path, helper: None, _guard: None })
    }

    async fn release(&self, _lease: WorkspaceLease) {
        self.releases.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    async fn evict(&self) -> Vec<WorkspaceId> {
        Vec::new()
    }

    async fn stats(&self) -> WorkspaceStats {
        WorkspaceStats::default()
    }
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
