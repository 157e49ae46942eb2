use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    response::IntoResponse,
};
use tably_common::types::{StatePatch, Workspace, WorkspaceState};
use tracing::info;

use crate::{
    error::{ErrorCode, RelayError},
    store::WorkspaceStore,
};

use super::{parse_code, REVISION_HEADER};

pub(super) async fn put_workspace(
    State(store): State<Arc<WorkspaceStore>>,
    Path(raw_code): Path<String>,
    payload: Result<Json<Workspace>, JsonRejection>,
) -> Result<Json<Workspace>, RelayError> {
    let code = parse_code(&raw_code)?;
    let Json(workspace) = payload?;
    if workspace.code != code {
        return Err(RelayError::new(
            ErrorCode::ValidationFailed,
            format!("body code {} does not match path code {code}", workspace.code),
        ));
    }

    store.put_workspace(workspace.clone()).await;
    info!(workspace = %code, name = %workspace.name, "workspace document written");
    Ok(Json(workspace))
}

pub(super) async fn get_workspace(
    State(store): State<Arc<WorkspaceStore>>,
    Path(raw_code): Path<String>,
) -> Result<Json<Workspace>, RelayError> {
    let code = parse_code(&raw_code)?;
    store
        .workspace(&code)
        .await
        .map(Json)
        .ok_or_else(|| RelayError::new(ErrorCode::NotFound, format!("workspace {code} not found")))
}

pub(super) async fn get_state(
    State(store): State<Arc<WorkspaceStore>>,
    Path(raw_code): Path<String>,
) -> Result<impl IntoResponse, RelayError> {
    let code = parse_code(&raw_code)?;
    let committed = store.state(&code).await.ok_or_else(|| {
        RelayError::new(ErrorCode::NotFound, format!("state for workspace {code} not found"))
    })?;
    Ok(([(REVISION_HEADER, committed.revision.to_string())], Json(committed.state)))
}

pub(super) async fn merge_state(
    State(store): State<Arc<WorkspaceStore>>,
    Path(raw_code): Path<String>,
    payload: Result<Json<StatePatch>, JsonRejection>,
) -> Result<([(&'static str, String); 1], Json<WorkspaceState>), RelayError> {
    let code = parse_code(&raw_code)?;
    let Json(patch) = payload?;
    let writer = patch.updated_by.clone();

    let committed = store.merge_state(&code, patch).await;
    info!(
        workspace = %code,
        revision = committed.revision,
        tabs = committed.state.tabs.len(),
        writer = writer.as_ref().map(|w| w.as_str()).unwrap_or("-"),
        "state document committed"
    );
    Ok(([(REVISION_HEADER, committed.revision.to_string())], Json(committed.state)))
}
