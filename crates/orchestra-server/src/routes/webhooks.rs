use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use orchestra_core::url_hygiene::validate_webhook_url;
use orchestra_types::ids::WebhookId;
use orchestra_types::user::CAP_WEBHOOKS_MANAGE;
use orchestra_types::webhook::Webhook;
use orchestra_types::OrchestraError;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub url: String,
    pub events: Vec<String>,
    pub secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    #[serde(flatten)]
    pub webhook: Webhook,
}

pub async fn create(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<CreateRequest>) -> Result<(axum::http::StatusCode, Json<CreateResponse>), ApiError> {
    let mut gate = state.gate.clone();
    let identity = authenticate(&mut gate, &headers).await?;
    gate.authorize(&identity, CAP_WEBHOOKS_MANAGE)?;

    validate_webhook_url(&body.url, &state.url_hygiene).map_err(OrchestraError::Validation)?;
    if body.events.is_empty() {
        return Err(OrchestraError::Validation("events must name at least one event-type pattern".to_string()).into());
    }

    let secret = body.secret.unwrap_or_else(generate_secret);
    let webhook = state
        .store
        .webhooks()
        .await
        .map_err(store_unavailable)?
        .repo()
        .create(identity.user.id, &body.url, &secret, &body.events)
        .await
        .map_err(store_unavailable)?;

    Ok((axum::http::StatusCode::CREATED, Json(CreateResponse { webhook })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<WebhookId>,
    Json(body): Json<UpdateRequest>,
) -> Result<Json<Webhook>, ApiError> {
    let mut gate = state.gate.clone();
    let identity = authenticate(&mut gate, &headers).await?;
    gate.authorize(&identity, CAP_WEBHOOKS_MANAGE)?;

    if let Some(url) = &body.url {
        validate_webhook_url(url, &state.url_hygiene).map_err(OrchestraError::Validation)?;
    }

    let mut handle = state.store.webhooks().await.map_err(store_unavailable)?;
    let mut repo = handle.repo();
    owned_webhook(&mut repo, id, identity.user.id).await?;

    let updated = repo
        .update(id, body.url.as_deref(), body.events.as_deref())
        .await
        .map_err(store_unavailable)?
        .ok_or_else(|| OrchestraError::NotFound(format!("webhook {id} not found")))?;
    Ok(Json(updated))
}

pub async fn delete(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<WebhookId>) -> Result<axum::http::StatusCode, ApiError> {
    let mut gate = state.gate.clone();
    let identity = authenticate(&mut gate, &headers).await?;
    gate.authorize(&identity, CAP_WEBHOOKS_MANAGE)?;

    let mut handle = state.store.webhooks().await.map_err(store_unavailable)?;
    let mut repo = handle.repo();
    owned_webhook(&mut repo, id, identity.user.id).await?;
    repo.delete(id).await.map_err(store_unavailable)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub webhook: Webhook,
    pub failed_in_trailing_24h: i64,
    pub recent_deliveries: Vec<orchestra_types::WebhookDelivery>,
}

pub async fn stats(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<WebhookId>) -> Result<Json<StatsResponse>, ApiError> {
    let mut gate = state.gate.clone();
    let identity = authenticate(&mut gate, &headers).await?;
    gate.authorize(&identity, CAP_WEBHOOKS_MANAGE)?;

    let mut handle = state.store.webhooks().await.map_err(store_unavailable)?;
    let mut repo = handle.repo();
    let webhook = owned_webhook(&mut repo, id, identity.user.id).await?;
    let since = Utc::now() - chrono::Duration::hours(24);
    let failed_in_trailing_24h = repo.count_failed_in_window(id, since).await.map_err(store_unavailable)?;
    let recent_deliveries = repo.list_deliveries(id, 50).await.map_err(store_unavailable)?;

    Ok(Json(StatsResponse { webhook, failed_in_trailing_24h, recent_deliveries }))
}

async fn owned_webhook(repo: &mut orchestra_store::Webhooks<'_>, id: WebhookId, user_id: orchestra_types::ids::UserId) -> Result<Webhook, ApiError> {
    let webhook = repo.get_by_id(id).await.map_err(store_unavailable)?.ok_or_else(|| OrchestraError::NotFound(format!("webhook {id} not found")))?;
    if webhook.owner != user_id {
        return Err(OrchestraError::NotFound(format!("webhook {id} not found")).into());
    }
    Ok(webhook)
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn store_unavailable(err: orchestra_store::StoreError) -> ApiError {
    ApiError(OrchestraError::Transient(err.to_string()))
}
