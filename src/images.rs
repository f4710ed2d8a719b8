use std::path::{Path, PathBuf};

use futures_core::future::BoxFuture;
use rand::seq::IndexedRandom;
use thiserror::Error;

use crate::database::{self, Database};

const IMAGE_EXTENSIONS: [&str; 5] = ["gif", "jpeg", "jpg", "png", "webp"];

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("no images found in {}", .0.display())]
    EmptyLibrary(PathBuf),
    #[error("failed to scan image directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] database::Error),
}

#[derive(Debug, Clone)]
pub struct Image {
    pub name: String,
    pub payload: ImagePayload,
}

/// Pictures already known to Telegram are sent by their cached file id,
/// everything else is uploaded from disk.
#[derive(Debug, Clone)]
pub enum ImagePayload {
    FileId(String),
    Path(PathBuf),
}

pub trait ContentSource: Send + Sync {
    fn pick(&self) -> BoxFuture<'_, Result<Image, ContentError>>;
}

pub struct ImageLibrary {
    dir: PathBuf,
    files: Vec<String>,
    db: Database,
}

impl ImageLibrary {
    pub fn new(dir: &Path, db: Database) -> Result<Self, ContentError> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if entry.file_type()?.is_file() && is_image_file(&name) {
                files.push(name);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(ContentError::EmptyLibrary(dir.to_owned()));
        }

        log::info!("Loaded {} pictures from {}", files.len(), dir.display());

        Ok(Self {
            dir: dir.to_owned(),
            files,
            db,
        })
    }
}

impl ContentSource for ImageLibrary {
    fn pick(&self) -> BoxFuture<'_, Result<Image, ContentError>> {
        Box::pin(async move {
            let name = self
                .files
                .choose(&mut rand::rng())
                .ok_or_else(|| ContentError::EmptyLibrary(self.dir.clone()))?;

            let payload = match self.db.cached_file_id(name).await? {
                Some(file_id) => ImagePayload::FileId(file_id),
                None => ImagePayload::Path(self.dir.join(name)),
            };

            Ok(Image {
                name: name.clone(),
                payload,
            })
        })
    }
}

fn is_image_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}
