use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::api::response::{ApiError, JSend};
use crate::migration::{migration_state, MigrationState};
use crate::storage::models::LegacyKind;
use crate::storage::DatabaseError;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct MigrationStatusResponse {
    pub state: MigrationState,
    pub completed_at: Option<String>,
    pub images_migrated: Option<u64>,
    pub docs_migrated: Option<u64>,
    pub already_present: Option<u64>,
    pub unified_rows: u64,
    pub legacy_images: u64,
    pub legacy_docs: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn migration_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<MigrationStatusResponse>>, ApiError> {
    let internal = |e: DatabaseError| ApiError::internal(e.to_string());

    let (migration, record) = migration_state(&state.db).map_err(internal)?;
    let unified_rows = state.db.count_media().map_err(internal)?;
    let legacy_images = state
        .db
        .count_legacy(LegacyKind::Image)
        .map_err(internal)?;
    let legacy_docs = state
        .db
        .count_legacy(LegacyKind::Doc)
        .map_err(internal)?;

    Ok(JSend::success(MigrationStatusResponse {
        state: migration,
        completed_at: record.as_ref().map(|r| r.completed_at.to_rfc3339()),
        images_migrated: record.as_ref().map(|r| r.images_migrated),
        docs_migrated: record.as_ref().map(|r| r.docs_migrated),
        already_present: record.as_ref().map(|r| r.already_present),
        unified_rows,
        legacy_images,
        legacy_docs,
    }))
}
