//! Movement history and photo handlers

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use shared::{MovementHistory, PaginatedResponse};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::CurrentUser;
use crate::services::history::HistoryService;
use crate::services::photo::{MovementPhoto, PhotoService, PhotoUpload};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryPageQuery {
    pub page: Option<u32>,
}

fn photos(state: &AppState) -> PhotoService {
    PhotoService::new(
        state.db.clone(),
        state.blobs.clone(),
        state.config.storage.max_photo_bytes,
    )
}

/// Global trail, newest first
pub async fn history_page(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<HistoryPageQuery>,
) -> AppResult<Json<PaginatedResponse<MovementHistory>>> {
    let page = HistoryService::new(state.db).page(query.page).await?;
    Ok(Json(page))
}

/// Read the `file` and `caption` fields of a multipart upload
async fn read_upload(mut multipart: Multipart) -> AppResult<PhotoUpload> {
    let mut file: Option<(Option<String>, String, Vec<u8>)> = None;
    let mut caption = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation("file", &e.body_text()))?
    {
        match field.name() {
            Some("file") => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::validation("file", &e.body_text()))?;
                file = Some((file_name, content_type, bytes.to_vec()));
            }
            Some("caption") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::validation("caption", &e.body_text()))?;
                caption = Some(text);
            }
            _ => {}
        }
    }

    let (file_name, content_type, bytes) =
        file.ok_or_else(|| AppError::validation("file", "File is required"))?;
    Ok(PhotoUpload {
        file_name,
        content_type,
        bytes,
        caption,
    })
}

pub async fn attach_photo(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(history_id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<MovementPhoto>)> {
    let upload = read_upload(multipart).await?;
    let photo = photos(&state)
        .attach(&user.actor(), history_id, upload)
        .await?;
    Ok((StatusCode::CREATED, Json(photo)))
}

pub async fn list_photos(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(history_id): Path<Uuid>,
) -> AppResult<Json<Vec<MovementPhoto>>> {
    let list = photos(&state).list(history_id).await?;
    Ok(Json(list))
}

/// Raw photo bytes with their stored content type
pub async fn photo_content(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(photo_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let (photo, bytes) = photos(&state).content(photo_id).await?;
    Ok(([(header::CONTENT_TYPE, photo.content_type)], bytes))
}
