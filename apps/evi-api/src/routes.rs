use axum::{
	Json, Router,
	extract::State,
	http::{HeaderMap, StatusCode, header::AUTHORIZATION},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::Serialize;

use crate::state::AppState;
use evi_service::{
	Error as ServiceError, EvidencePack, EvidencePackRequest, IngestRequest, IngestResponse,
	RebuildReport, RecordChanged, SearchRequest, SearchResponse, Topic, WorkspaceReindexRequest,
};

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/knowledge/ingest", post(ingest))
		.route("/v1/search", post(search))
		.route("/v1/evidence/pack", post(evidence_pack))
		.route("/v1/events/record_changed", post(record_changed))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new()
		.route("/v1/admin/reindex", post(reindex))
		.route("/v1/admin/rebuild_indexes", post(rebuild_indexes))
		.with_state(state)
}

#[derive(Debug, Serialize)]
struct QueuedResponse {
	queued: u64,
}

#[derive(Debug, Serialize)]
struct AcceptedResponse {
	receivers: usize,
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn ingest(
	State(state): State<AppState>,
	Json(payload): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
	let response = state.service.ingest(payload).await?;

	Ok(Json(response))
}

async fn search(
	State(state): State<AppState>,
	Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
	let response = state.service.search(payload).await?;

	Ok(Json(response))
}

async fn evidence_pack(
	State(state): State<AppState>,
	Json(payload): Json<EvidencePackRequest>,
) -> Result<Json<EvidencePack>, ApiError> {
	let response = state.service.build_evidence_pack(payload).await?;

	Ok(Json(response))
}

/// Hands an upstream change to the reindex subscriber. Delivery is at most once.
async fn record_changed(
	State(state): State<AppState>,
	Json(payload): Json<RecordChanged>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
	if payload.tenant_id.trim().is_empty()
		|| payload.entity_kind.trim().is_empty()
		|| payload.entity_id.trim().is_empty()
	{
		return Err(json_error(
			StatusCode::UNPROCESSABLE_ENTITY,
			"INVALID_REQUEST",
			"tenant_id, entity_kind and entity_id must be non-empty.",
		));
	}

	let receivers = state.service.bus.publish_json(Topic::RecordChanged, &payload);

	Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { receivers })))
}

async fn reindex(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<WorkspaceReindexRequest>,
) -> Result<Json<QueuedResponse>, ApiError> {
	authorize_admin(&state, &headers)?;

	let queued = state.service.queue_workspace_reindex(payload).await?;

	Ok(Json(QueuedResponse { queued }))
}

async fn rebuild_indexes(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<RebuildReport>, ApiError> {
	authorize_admin(&state, &headers)?;

	let response = state.service.rebuild_indexes().await?;

	Ok(Json(response))
}

fn authorize_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
	let Some(expected) = state.service.cfg.security.admin_auth_token.as_deref() else {
		return Ok(());
	};
	let presented = headers
		.get(AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.and_then(|value| value.strip_prefix("Bearer "));

	if presented == Some(expected) {
		Ok(())
	} else {
		Err(json_error(
			StatusCode::UNAUTHORIZED,
			"UNAUTHORIZED",
			"Admin token is missing or invalid.",
		))
	}
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
}
impl ApiError {
	fn new(status: StatusCode, error_code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { status, error_code: error_code.into(), message: message.into() }
	}
}
impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		match err {
			ServiceError::InvalidRequest { message } =>
				json_error(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_REQUEST", message),
			ServiceError::NotFound { message } =>
				json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message),
			ServiceError::Conflict { message } =>
				json_error(StatusCode::CONFLICT, "CONFLICT", message),
			ServiceError::Provider { message } =>
				json_error(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", message),
			ServiceError::Cancelled =>
				json_error(StatusCode::SERVICE_UNAVAILABLE, "CANCELLED", "Operation cancelled."),
			ServiceError::Policy { message }
			| ServiceError::Storage { message }
			| ServiceError::Index { message } => {
				tracing::error!(error = %message, "Request failed.");

				json_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "Internal error.")
			},
		}
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}

pub fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
	ApiError::new(status, code, message)
}
