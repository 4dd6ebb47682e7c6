//! Read side: projects, commit history and file export.

use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::{Query, State};
use axum::{Extension, Json};
use sentra_core::models::{CommitInfo, ExportFile, ProjectInfo, UserInfo};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct RootQuery {
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub at: Option<String>,
}

impl RootQuery {
    fn root(&self) -> Result<&str, ApiError> {
        self.root
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ApiError::bad_request("missing root"))
    }
}

pub async fn export(
    State(state): State<AppState>,
    Extension(user): Extension<UserInfo>,
    Query(query): Query<RootQuery>,
) -> Result<Json<Vec<ExportFile>>, ApiError> {
    let root = query.root()?;
    let at = query.at.as_deref().map(str::trim).filter(|a| !a.is_empty());
    let files = state
        .stores
        .exports
        .export(&user.id, root, at)
        .map_err(|e| ApiError::from_store(e, "export failed"))?;
    Ok(Json(files))
}

pub async fn commits(
    State(state): State<AppState>,
    Extension(user): Extension<UserInfo>,
    Query(query): Query<RootQuery>,
) -> Result<Json<Vec<CommitInfo>>, ApiError> {
    let root = query.root()?;
    let commits = state
        .stores
        .commits
        .list_commits(&user.id, root)
        .map_err(|e| ApiError::from_store(e, "commits failed"))?;
    Ok(Json(commits))
}

pub async fn projects(
    State(state): State<AppState>,
    Extension(user): Extension<UserInfo>,
) -> Result<Json<Vec<ProjectInfo>>, ApiError> {
    let projects = state
        .stores
        .projects
        .list_projects(&user.id)
        .map_err(|e| ApiError::from_store(e, "projects failed"))?;
    Ok(Json(projects))
}
