//! Document HTTP API.
//!
//! Creating a document also records its outbox event, atomically, through
//! [`DocumentStore::create`]; the read endpoints are what the consumer's
//! hydration fetch resolves against.

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use outpost_domain::document::{Document, DocumentError, DocumentStore};

#[derive(Clone)]
pub struct ApiState {
    pub documents: Arc<dyn DocumentStore>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/documents", get(list_documents).post(create_document))
        .route("/documents/{id}", get(read_document))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CreateDocumentRequest {
    pub content: String,
}

/// Store-level failures surface as a plain 500; the pipeline has no richer
/// client-facing error contract.
pub struct ApiError(DocumentError);

impl From<DocumentError> for ApiError {
    fn from(err: DocumentError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "Document request failed");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

async fn create_document(
    State(state): State<ApiState>,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<Response, ApiError> {
    let (document, event) = state.documents.create(request.content).await?;
    info!(document_id = %document.id, event_id = %event.id, "Document created");

    let location = format!("/documents/{}", document.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(document),
    )
        .into_response())
}

async fn list_documents(State(state): State<ApiState>) -> Result<Json<Vec<Document>>, ApiError> {
    Ok(Json(state.documents.list().await?))
}

async fn read_document(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    match state.documents.find_by_id(id).await? {
        Some(document) => Ok(Json(document).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}
