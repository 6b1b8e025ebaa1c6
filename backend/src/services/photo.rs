//! Photos attached to history rows
//!
//! Bytes live in a `BlobStore` addressed by `blob_ref`; the database keeps
//! only the metadata row.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::Actor;
use sqlx::{FromRow, PgPool};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Storage for photo bytes
#[axum::async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, blob_ref: &str, bytes: &[u8]) -> AppResult<()>;
    async fn get(&self, blob_ref: &str) -> AppResult<Vec<u8>>;
    async fn delete(&self, blob_ref: &str) -> AppResult<()>;
}

/// Blob store backed by a local directory
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, blob_ref: &str) -> AppResult<PathBuf> {
        // Refs are generated server-side; anything else is rejected
        let valid = !blob_ref.is_empty()
            && blob_ref
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
        if !valid || blob_ref.starts_with('.') {
            return Err(AppError::Internal(format!("invalid blob ref {}", blob_ref)));
        }
        Ok(self.root.join(blob_ref))
    }
}

fn storage_error(err: std::io::Error) -> AppError {
    AppError::StorageError(err.to_string())
}

#[axum::async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, blob_ref: &str, bytes: &[u8]) -> AppResult<()> {
        let path = self.path_for(blob_ref)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(storage_error)?;
        tokio::fs::write(&path, bytes).await.map_err(storage_error)
    }

    async fn get(&self, blob_ref: &str) -> AppResult<Vec<u8>> {
        let path = self.path_for(blob_ref)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound("Photo".to_string()))
            }
            Err(e) => Err(storage_error(e)),
        }
    }

    async fn delete(&self, blob_ref: &str) -> AppResult<()> {
        let path = self.path_for(blob_ref)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(e)),
        }
    }
}

/// Photo metadata
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MovementPhoto {
    pub id: Uuid,
    pub history_id: Uuid,
    pub blob_ref: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub caption: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An uploaded file as read from the multipart body
#[derive(Debug)]
pub struct PhotoUpload {
    pub file_name: Option<String>,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub caption: Option<String>,
}

/// Photo service
#[derive(Clone)]
pub struct PhotoService {
    db: PgPool,
    blobs: Arc<dyn BlobStore>,
    max_bytes: usize,
}

const PHOTO_COLUMNS: &str =
    "id, history_id, blob_ref, content_type, size_bytes, caption, created_at";

const MAX_CAPTION_CHARS: usize = 200;

/// File extension for the stored blob, derived from the content type
fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" => "heic",
        _ => "bin",
    }
}

fn validate_upload(upload: &PhotoUpload, max_bytes: usize) -> AppResult<Option<String>> {
    if !upload.content_type.starts_with("image/") {
        return Err(AppError::validation("file", "Only image uploads are accepted"));
    }
    if upload.bytes.is_empty() {
        return Err(AppError::validation("file", "File is empty"));
    }
    if upload.bytes.len() > max_bytes {
        return Err(AppError::validation("file", "File is too large"));
    }

    let caption = upload
        .caption
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    if caption
        .as_ref()
        .is_some_and(|c| c.chars().count() > MAX_CAPTION_CHARS)
    {
        return Err(AppError::validation(
            "caption",
            "Caption must be at most 200 characters",
        ));
    }
    Ok(caption)
}

impl PhotoService {
    pub fn new(db: PgPool, blobs: Arc<dyn BlobStore>, max_bytes: usize) -> Self {
        Self {
            db,
            blobs,
            max_bytes,
        }
    }

    /// Store an image and link it to a history row
    pub async fn attach(
        &self,
        actor: &Actor,
        history_id: Uuid,
        upload: PhotoUpload,
    ) -> AppResult<MovementPhoto> {
        let caption = validate_upload(&upload, self.max_bytes)?;

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM movement_history WHERE id = $1)",
        )
        .bind(history_id)
        .fetch_one(&self.db)
        .await?;
        if !exists {
            return Err(AppError::NotFound("History".to_string()));
        }

        let blob_ref = format!(
            "{}.{}",
            Uuid::new_v4().simple(),
            extension_for(&upload.content_type)
        );
        self.blobs.put(&blob_ref, &upload.bytes).await?;

        let inserted = sqlx::query_as::<_, MovementPhoto>(&format!(
            r#"
            INSERT INTO movement_photos (history_id, blob_ref, content_type, size_bytes, caption)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            PHOTO_COLUMNS
        ))
        .bind(history_id)
        .bind(&blob_ref)
        .bind(&upload.content_type)
        .bind(upload.bytes.len() as i64)
        .bind(&caption)
        .fetch_one(&self.db)
        .await;

        let photo = match inserted {
            Ok(photo) => photo,
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&blob_ref).await {
                    tracing::warn!(blob_ref = %blob_ref, error = %cleanup, "Orphan photo blob left behind");
                }
                return Err(e.into());
            }
        };

        tracing::info!(
            photo_id = %photo.id,
            history_id = %history_id,
            size_bytes = photo.size_bytes,
            file_name = upload.file_name.as_deref().unwrap_or(""),
            user_id = %actor.user_id,
            "Photo attached"
        );
        Ok(photo)
    }

    pub async fn list(&self, history_id: Uuid) -> AppResult<Vec<MovementPhoto>> {
        let photos = sqlx::query_as::<_, MovementPhoto>(&format!(
            "SELECT {} FROM movement_photos WHERE history_id = $1 ORDER BY created_at, id",
            PHOTO_COLUMNS
        ))
        .bind(history_id)
        .fetch_all(&self.db)
        .await?;

        Ok(photos)
    }

    /// Metadata and bytes of one photo
    pub async fn content(&self, photo_id: Uuid) -> AppResult<(MovementPhoto, Vec<u8>)> {
        let photo = sqlx::query_as::<_, MovementPhoto>(&format!(
            "SELECT {} FROM movement_photos WHERE id = $1",
            PHOTO_COLUMNS
        ))
        .bind(photo_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Photo".to_string()))?;

        let bytes = self.blobs.get(&photo.blob_ref).await?;
        Ok((photo, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(content_type: &str, size: usize, caption: Option<&str>) -> PhotoUpload {
        PhotoUpload {
            file_name: Some("photo".into()),
            content_type: content_type.into(),
            bytes: vec![7; size],
            caption: caption.map(str::to_string),
        }
    }

    #[test]
    fn test_validate_upload() {
        assert!(validate_upload(&upload("image/png", 10, None), 100).is_ok());
        assert!(validate_upload(&upload("application/pdf", 10, None), 100).is_err());
        assert!(validate_upload(&upload("image/png", 0, None), 100).is_err());
        assert!(validate_upload(&upload("image/png", 101, None), 100).is_err());

        let caption = validate_upload(&upload("image/jpeg", 1, Some("  pallet  ")), 100).unwrap();
        assert_eq!(caption.as_deref(), Some("pallet"));
        let caption = validate_upload(&upload("image/jpeg", 1, Some("   ")), 100).unwrap();
        assert_eq!(caption, None);
        let long = "x".repeat(201);
        assert!(validate_upload(&upload("image/jpeg", 1, Some(&long)), 100).is_err());
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("image/x-unknown"), "bin");
    }

    #[test]
    fn test_local_store_roundtrip() {
        let root = std::env::temp_dir().join(format!("sementes-blobs-{}", Uuid::new_v4()));
        let store = LocalBlobStore::new(&root);

        tokio_test::block_on(async {
            store.put("abc.png", b"bytes").await.unwrap();
            assert_eq!(store.get("abc.png").await.unwrap(), b"bytes".to_vec());
            store.delete("abc.png").await.unwrap();
            assert!(matches!(
                store.get("abc.png").await,
                Err(AppError::NotFound(_))
            ));
            // Deleting twice is fine
            store.delete("abc.png").await.unwrap();
        });

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_local_store_rejects_traversal() {
        let store = LocalBlobStore::new("/tmp/unused");
        assert!(store.path_for("../etc/passwd").is_err());
        assert!(store.path_for(".hidden").is_err());
        assert!(store.path_for("").is_err());
        assert!(store.path_for("a1b2.jpg").is_ok());
    }
}
