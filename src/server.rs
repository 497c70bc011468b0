//! OSB HTTP endpoints
//!
//! Thin mapping of the OSB endpoints onto [`Broker`]; every decision is made
//! by the broker core.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use hb_broker::{
    BindRequest, Broker, DeprovisionRequest, LastOperationRequest, OsbContext, ProvisionRequest,
};
use hb_common::OperationId;

use crate::error::ApiError;

/// Header carrying the OSB API version; required on every `/v2` call
pub const API_VERSION_HEADER: &str = "x-broker-api-version";

/// Header carrying the identity of the platform user
pub const ORIGINATING_IDENTITY_HEADER: &str = "x-broker-api-originating-identity";

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Broker core
    pub broker: Arc<Broker>,
}

/// Build the OSB router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/statusz", get(|| async { "OK" }))
        .route("/v2/catalog", get(catalog_handler))
        .route(
            "/v2/service_instances/{instance_id}",
            put(provision_handler).delete(deprovision_handler),
        )
        .route(
            "/v2/service_instances/{instance_id}/last_operation",
            get(last_operation_handler),
        )
        .route(
            "/v2/service_instances/{instance_id}/service_bindings/{binding_id}",
            put(bind_handler).delete(unbind_handler),
        )
        .with_state(state)
}

/// Serve `app` on `addr` until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "OSB API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Request metadata from the OSB headers
fn osb_context(headers: &HeaderMap) -> Result<OsbContext, ApiError> {
    let api_version = headers
        .get(API_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::MissingApiVersion)?;
    let originating_identity = headers
        .get(ORIGINATING_IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    Ok(OsbContext {
        api_version: api_version.to_string(),
        originating_identity,
    })
}

#[derive(Debug, Deserialize)]
struct ProvisionQuery {
    #[serde(default)]
    accepts_incomplete: bool,
}

#[derive(Debug, Deserialize)]
struct DeprovisionQuery {
    #[serde(default)]
    accepts_incomplete: bool,
    #[serde(default)]
    service_id: String,
    #[serde(default)]
    plan_id: String,
}

#[derive(Debug, Deserialize)]
struct LastOperationQuery {
    #[serde(default)]
    operation: Option<String>,
}

#[derive(Debug, Serialize)]
struct OperationBody {
    operation: OperationId,
}

/// 202 with the operation key, or 200 with an empty object
fn async_outcome(is_async: bool, operation_key: Option<OperationId>) -> Response {
    match (is_async, operation_key) {
        (true, Some(operation)) => {
            (StatusCode::ACCEPTED, Json(OperationBody { operation })).into_response()
        }
        _ => (StatusCode::OK, Json(json!({}))).into_response(),
    }
}

/// 202 with the operation key, or 410 once the instance is already gone
fn deprovision_outcome(is_async: bool, operation_key: Option<OperationId>) -> Response {
    match (is_async, operation_key) {
        (true, Some(operation)) => {
            (StatusCode::ACCEPTED, Json(OperationBody { operation })).into_response()
        }
        _ => (StatusCode::GONE, Json(json!({}))).into_response(),
    }
}

fn bad_query(e: QueryRejection) -> ApiError {
    ApiError::BadRequest(e.body_text())
}

async fn catalog_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let osb_ctx = osb_context(&headers)?;
    let resp = state.broker.catalog(&osb_ctx).await?;
    Ok((StatusCode::OK, Json(resp)).into_response())
}

async fn provision_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
    query: Result<Query<ProvisionQuery>, QueryRejection>,
    body: Result<Json<ProvisionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let osb_ctx = osb_context(&headers)?;
    let Query(query) = query.map_err(bad_query)?;
    let Json(mut req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    req.instance_id = instance_id.into();
    req.accepts_incomplete = query.accepts_incomplete;
    debug!(instance_id = %req.instance_id, service_id = %req.service_id, plan_id = %req.plan_id, "provision request");

    let resp = state.broker.provision(&osb_ctx, req).await?;
    Ok(async_outcome(resp.is_async, resp.operation_key))
}

async fn deprovision_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
    query: Result<Query<DeprovisionQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let osb_ctx = osb_context(&headers)?;
    let Query(query) = query.map_err(bad_query)?;
    let req = DeprovisionRequest {
        instance_id: instance_id.into(),
        service_id: query.service_id.into(),
        plan_id: query.plan_id.into(),
        accepts_incomplete: query.accepts_incomplete,
    };
    debug!(instance_id = %req.instance_id, "deprovision request");

    let resp = state.broker.deprovision(&osb_ctx, req).await?;
    Ok(deprovision_outcome(resp.is_async, resp.operation_key))
}

async fn bind_handler(
    State(state): State<AppState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Result<Json<BindRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let osb_ctx = osb_context(&headers)?;
    let Json(mut req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    req.instance_id = instance_id.into();
    req.binding_id = binding_id;
    debug!(instance_id = %req.instance_id, binding_id = %req.binding_id, "bind request");

    let resp = state
        .broker
        .bind(&osb_ctx, req)
        .await
        .map_err(ApiError::from_bind)?;
    Ok((StatusCode::CREATED, Json(resp)).into_response())
}

/// Bindings hold no state of their own, so there is never anything to remove
async fn unbind_handler(
    Path((instance_id, binding_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    osb_context(&headers)?;
    debug!(instance_id = %instance_id, binding_id = %binding_id, "unbind request");
    Ok((StatusCode::GONE, Json(json!({}))).into_response())
}

async fn last_operation_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
    query: Result<Query<LastOperationQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let osb_ctx = osb_context(&headers)?;
    let Query(query) = query.map_err(bad_query)?;
    let req = LastOperationRequest {
        instance_id: instance_id.into(),
        operation_key: query
            .operation
            .filter(|op| !op.is_empty())
            .map(OperationId::new),
    };

    let resp = state.broker.last_operation(&osb_ctx, req).await?;
    Ok((StatusCode::OK, Json(resp)).into_response())
}
