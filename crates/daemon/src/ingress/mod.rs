// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Webhook ingress: signature verification, dedup, normalization,
//! activation, and enqueue.
//!
//! Order of checks for every delivery:
//! 1. Slack URL-verification handshake (answered before auth, per Slack's
//!    install flow)
//! 2. signature (constant-time HMAC, fail closed)
//! 3. rate limits
//! 4. normalize into one provider-agnostic event
//! 5. idempotency marker (`dedup:`) and posted-artifact marker (`posted:`)
//! 6. activation rules, in-flight dedup
//! 7. task creation + enqueue (backpressure may refuse)

pub mod activation;
pub mod normalize;
pub mod rate_limit;
pub mod signature;

use activation::ActivationRules;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use gantry_core::{Clock, OrgId, Provider, Secret, Task, TaskId, TaskSource};
use gantry_engine::workspace::Workspaces;
use gantry_store::{QueueCaps, Store, StoreError};
use normalize::NormalizeError;
use rate_limit::{RateConfig, RateLimiter};
use serde_json::{json, Value};
use signature::SignatureCheck;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

const MARKER_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub caps: QueueCaps,
    /// Per-provider fallback secrets; an installation's own secret wins.
    pub webhook_secrets: HashMap<&'static str, Secret>,
    pub rules: ActivationRules,
    pub rate: RateConfig,
    /// Reported by /health.
    pub worker_pool_size: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            caps: QueueCaps::default(),
            webhook_secrets: HashMap::new(),
            rules: ActivationRules::default(),
            rate: RateConfig::default(),
            worker_pool_size: 10,
        }
    }
}

pub struct AppState<C: Clock> {
    pub store: Arc<Store>,
    pub clock: C,
    pub workspaces: Arc<dyn Workspaces>,
    pub config: Arc<IngressConfig>,
    pub rate: Arc<RateLimiter<C>>,
}

impl<C: Clock> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: self.clock.clone(),
            workspaces: Arc::clone(&self.workspaces),
            config: Arc::clone(&self.config),
            rate: Arc::clone(&self.rate),
        }
    }
}

impl<C: Clock> AppState<C> {
    pub fn new(
        store: Arc<Store>,
        clock: C,
        workspaces: Arc<dyn Workspaces>,
        config: IngressConfig,
    ) -> Self {
        let rate = Arc::new(RateLimiter::new(clock.clone(), config.rate));
        Self { store, clock, workspaces, config: Arc::new(config), rate }
    }
}

pub fn router<C: Clock>(state: AppState<C>) -> Router {
    Router::new()
        .route("/webhooks/{provider}", post(receive::<C>))
        .route("/health", get(health::<C>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn ack_skip(reason: &str) -> Response {
    reply(StatusCode::OK, json!({ "status": "ignored", "reason": reason }))
}

async fn receive<C: Clock>(
    State(state): State<AppState<C>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(provider) = Provider::parse(&provider) else {
        return reply(StatusCode::BAD_REQUEST, json!({ "error": "unknown provider" }));
    };

    // Slack's install-time handshake happens before any signing secret is
    // configured on their side.
    if provider == Provider::Slack {
        if let Ok(value) = serde_json::from_slice::<Value>(&body) {
            if value.get("type").and_then(Value::as_str) == Some("url_verification") {
                let challenge = value.get("challenge").and_then(Value::as_str).unwrap_or("");
                return reply(StatusCode::OK, json!({ "challenge": challenge }));
            }
        }
    }

    let org = normalize::extract_org(provider, &headers, &body);
    let installation = org
        .as_deref()
        .and_then(|org| state.store.active_installation(provider, org));

    let secret = installation
        .as_ref()
        .and_then(|i| i.webhook_secret.clone())
        .or_else(|| state.config.webhook_secrets.get(provider.as_str()).cloned());
    let Some(secret) = secret else {
        tracing::warn!(%provider, "no webhook secret configured, rejecting");
        return reply(StatusCode::UNAUTHORIZED, json!({ "error": "unauthenticated" }));
    };
    if signature::verify(provider, &secret, &headers, &body) != SignatureCheck::Valid {
        return reply(StatusCode::UNAUTHORIZED, json!({ "error": "unauthenticated" }));
    }

    if let Some(org) = org.as_deref() {
        if !state.rate.admit(org, provider.as_str()) {
            return reply(StatusCode::TOO_MANY_REQUESTS, json!({ "error": "rate limited" }));
        }
    }

    let event = match normalize::normalize(provider, &headers, &body) {
        Ok(event) => event,
        Err(NormalizeError::Irrelevant) => return ack_skip("irrelevant"),
        Err(NormalizeError::Malformed(reason)) => {
            return reply(StatusCode::BAD_REQUEST, json!({ "error": reason }));
        }
    };

    let now = state.clock.epoch_ms();

    // Loop prevention: events carrying an artifact we posted are echoes.
    if let Some(artifact_id) = &event.artifact_id {
        let key = format!("posted:{}:{}", provider, artifact_id);
        if state.store.marker_present(&key, now) {
            tracing::debug!(%provider, artifact = %artifact_id, "dropping self-generated echo");
            return ack_skip("self-generated");
        }
    }

    // Idempotency: one task per delivery id within the TTL.
    let dedup_key = format!("dedup:{}:{}", provider, event.event_id);
    match state.store.set_marker_if_absent(&dedup_key, now, MARKER_TTL) {
        Ok(true) => {}
        Ok(false) => return ack_skip("duplicate"),
        Err(e) => return store_error(e),
    }

    let Some(activation) = state.config.rules.evaluate(&event) else {
        return ack_skip("no activation");
    };

    let Some(installation) = installation else {
        tracing::warn!(%provider, org = ?org, "activated event without installation");
        return ack_skip("no installation");
    };

    // One task per (provider, pr/ticket, command) at a time.
    if let Some(key) = event.source_ref.inflight_key(provider, activation.command.as_str()) {
        let busy = state.store.read(|s| {
            s.tasks.values().any(|t| {
                !t.is_terminal()
                    && t.source_ref.inflight_key(t.provider, t.command.as_str()).as_deref()
                        == Some(key.as_str())
            })
        });
        if busy {
            return ack_skip("already in flight");
        }
    }

    let task = Task::new(
        TaskId::new_at(now),
        installation.id,
        provider,
        OrgId::new(event.org.clone()),
        TaskSource::Webhook,
        activation.command,
        activation.input,
        event.source_ref.clone(),
        activation.command.default_priority(),
        now,
    );
    let task_id = task.id;
    match state.store.create_task(task, &state.config.caps) {
        Ok(_) => {
            tracing::info!(%provider, task = %task_id, command = %activation.command, "task enqueued");
            reply(StatusCode::OK, json!({ "status": "queued", "task_id": task_id.as_str() }))
        }
        Err(StoreError::TooBusy) => {
            // The provider will redeliver; roll the dedup marker back so
            // that redelivery is not dropped as a duplicate.
            if let Err(e) = state.store.clear_marker(&dedup_key) {
                tracing::error!("cannot roll back dedup marker: {e}");
            }
            reply(StatusCode::SERVICE_UNAVAILABLE, json!({ "error": "too busy" }))
        }
        Err(e) => store_error(e),
    }
}

fn store_error(e: StoreError) -> Response {
    tracing::error!("store failure in ingress: {e}");
    reply(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "internal" }))
}

async fn health<C: Clock>(State(state): State<AppState<C>>) -> Response {
    let stats = state.store.stats();
    let workspaces = state.workspaces.stats().await;
    reply(
        StatusCode::OK,
        json!({
            "status": "ok",
            "queue": { "depth": stats.queued, "inflight": stats.inflight },
            "store": stats,
            "workspaces": {
                "count": workspaces.workspaces,
                "bytes_per_org": workspaces.bytes_per_org,
            },
            "workers": state.config.worker_pool_size,
        }),
    )
}

#[cfg(test)]
#[path = "ingress_tests.rs"]
mod tests;
