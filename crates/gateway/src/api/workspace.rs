//! Workspace file endpoints — CRUD over `<data_dir>/workspace` plus
//! tar.gz export/import.
//!
//! Paths are always relative to the workspace root; traversal and
//! absolute paths are `invalid_path`. `PUT`/`DELETE` against a
//! directory is `workspace_method_not_allowed`.

use std::path::{Component, Path as FsPath, PathBuf};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;

use nx_domain::error::Error;

use crate::state::AppState;

use super::{ApiJson, ApiResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve a client-supplied relative path inside the workspace root.
fn resolve_path(root: &FsPath, rel: &str) -> ApiResult<PathBuf> {
    let rel = rel.trim_matches('/');
    if rel.is_empty() {
        return Err(Error::InvalidPath("path must not be empty".into()).into());
    }
    let candidate = FsPath::new(rel);
    if candidate.is_absolute() {
        return Err(Error::InvalidPath(format!("path must be relative: {rel}")).into());
    }
    for component in candidate.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(
                    Error::InvalidPath(format!("path must not traverse: {rel}")).into(),
                )
            }
        }
    }
    Ok(root.join(candidate))
}

fn workspace_root(state: &AppState) -> ApiResult<PathBuf> {
    let root = state.config.workspace_path();
    std::fs::create_dir_all(&root).map_err(Error::Io)?;
    Ok(root)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /workspace/files
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn collect_files(
    root: &FsPath,
    dir: &FsPath,
    out: &mut Vec<serde_json::Value>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let meta = entry.metadata()?;
            let modified: Option<DateTime<Utc>> = meta.modified().ok().map(DateTime::from);
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            out.push(serde_json::json!({
                "path": rel,
                "size": meta.len(),
                "modified_at": modified,
            }));
        }
    }
    Ok(())
}

pub async fn list_files(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let root = workspace_root(&state)?;
    let mut files = Vec::new();
    collect_files(&root, &root, &mut files).map_err(Error::Io)?;
    files.sort_by_key(|v| v["path"].as_str().unwrap_or_default().to_string());
    let count = files.len();
    Ok(Json(serde_json::json!({ "files": files, "count": count })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET / PUT / DELETE /workspace/files/*path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let root = workspace_root(&state)?;
    let full = resolve_path(&root, &path)?;
    if full.is_dir() {
        return Err(Error::WorkspaceMethodNotAllowed(format!("{path} is a directory")).into());
    }
    let bytes = std::fs::read(&full)
        .map_err(|_| Error::WorkspaceFileNotFound(path.clone()))?;
    let content = String::from_utf8_lossy(&bytes).into_owned();
    Ok(Json(serde_json::json!({
        "path": path,
        "size": bytes.len(),
        "content": content,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PutFileRequest {
    pub content: String,
}

pub async fn put_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    ApiJson(body): ApiJson<PutFileRequest>,
) -> ApiResult<impl IntoResponse> {
    let root = workspace_root(&state)?;
    let full = resolve_path(&root, &path)?;
    if full.is_dir() {
        return Err(Error::WorkspaceMethodNotAllowed(format!("{path} is a directory")).into());
    }
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).map_err(Error::Io)?;
    }
    std::fs::write(&full, body.content.as_bytes()).map_err(Error::Io)?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "path": path,
        "size": body.content.len(),
    })))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let root = workspace_root(&state)?;
    let full = resolve_path(&root, &path)?;
    if full.is_dir() {
        return Err(Error::WorkspaceMethodNotAllowed(format!("{path} is a directory")).into());
    }
    if !full.exists() {
        return Err(Error::WorkspaceFileNotFound(path).into());
    }
    std::fs::remove_file(&full).map_err(Error::Io)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /workspace/export
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn export_workspace(State(state): State<AppState>) -> ApiResult<Response> {
    let root = workspace_root(&state)?;

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut archive = tar::Builder::new(encoder);
    archive
        .append_dir_all(".", &root)
        .map_err(Error::Io)?;
    let bytes = archive
        .into_inner()
        .and_then(|enc| enc.finish())
        .map_err(Error::Io)?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"workspace.tar.gz\"".to_string(),
            ),
        ],
        bytes,
    )
        .into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /workspace/import
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    #[serde(default = "default_mode")]
    mode: String,
}

fn default_mode() -> String {
    "merge".into()
}

pub async fn import_workspace(
    State(state): State<AppState>,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    if query.mode != "merge" && query.mode != "replace" {
        return Err(Error::InvalidImportMode(query.mode).into());
    }

    let root = workspace_root(&state)?;
    if query.mode == "replace" {
        std::fs::remove_dir_all(&root).map_err(Error::Io)?;
        std::fs::create_dir_all(&root).map_err(Error::Io)?;
    }

    let decoder = GzDecoder::new(body.as_ref());
    let mut archive = tar::Archive::new(decoder);
    let mut imported = 0usize;

    let entries = archive
        .entries()
        .map_err(|e| Error::InvalidJson(format!("archive did not decode: {e}")))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| Error::InvalidJson(format!("archive entry invalid: {e}")))?;
        let entry_path = entry
            .path()
            .map_err(|e| Error::InvalidPath(e.to_string()))?
            .into_owned();
        if !entry.header().entry_type().is_file() {
            continue;
        }
        // append_dir_all-produced archives prefix entries with "./".
        let rel = entry_path.to_string_lossy().into_owned();
        let rel = rel.trim_start_matches("./");
        let target = resolve_path(&root, rel)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        entry.unpack(&target).map_err(Error::Io)?;
        imported += 1;
    }

    tracing::info!(mode = %query.mode, imported, "workspace import finished");
    Ok(Json(serde_json::json!({ "ok": true, "imported": imported, "mode": query.mode })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_accepts_nested_relative() {
        let root = FsPath::new("/ws");
        assert_eq!(
            resolve_path(root, "notes/today.md").unwrap(),
            PathBuf::from("/ws/notes/today.md")
        );
        assert_eq!(
            resolve_path(root, "/leading/slash").unwrap(),
            PathBuf::from("/ws/leading/slash")
        );
    }

    #[test]
    fn resolve_path_rejects_traversal() {
        let root = FsPath::new("/ws");
        assert!(resolve_path(root, "../etc/passwd").is_err());
        assert!(resolve_path(root, "a/../../b").is_err());
        assert!(resolve_path(root, "").is_err());
        assert!(resolve_path(root, "a/./b").is_err());
    }
}
