use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures_core::future::BoxFuture;
use teloxide::types::ChatId;
use teloxide::{ApiError, RequestError};
use tokio::sync::Semaphore;

use crate::images::{ContentError, ContentSource, Image, ImagePayload};
use crate::outbound::{Outbound, SendError};

pub fn test_image() -> Image {
    Image {
        name: "peepo.png".to_string(),
        payload: ImagePayload::FileId("cached-file-id".to_string()),
    }
}

pub struct StaticSource;

impl ContentSource for StaticSource {
    fn pick(&self) -> BoxFuture<'_, Result<Image, ContentError>> {
        Box::pin(async { Ok(test_image()) })
    }
}

pub struct FailingSource;

impl ContentSource for FailingSource {
    fn pick(&self) -> BoxFuture<'_, Result<Image, ContentError>> {
        Box::pin(async { Err(ContentError::EmptyLibrary(PathBuf::from("nowhere"))) })
    }
}

/// Counts pick calls and blocks each one until a permit is released,
/// so tests control exactly when a delivery finishes.
pub struct GatedSource {
    pub picks: AtomicUsize,
    pub release: Semaphore,
}

impl GatedSource {
    pub fn new() -> Self {
        Self {
            picks: AtomicUsize::new(0),
            release: Semaphore::new(0),
        }
    }
}

impl ContentSource for GatedSource {
    fn pick(&self) -> BoxFuture<'_, Result<Image, ContentError>> {
        Box::pin(async {
            self.picks.fetch_add(1, Ordering::SeqCst);
            self.release
                .acquire()
                .await
                .expect("gate semaphore closed")
                .forget();
            Ok(test_image())
        })
    }
}

#[derive(Default)]
pub struct RecordingOutbound {
    pub texts: Mutex<Vec<(ChatId, String)>>,
    pub pictures: Mutex<Vec<ChatId>>,
    fail_for: Mutex<HashSet<ChatId>>,
}

impl RecordingOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_sends_to(&self, chat_id: ChatId) {
        self.fail_for.lock().unwrap().insert(chat_id);
    }

    pub fn texts_for(&self, chat_id: ChatId) -> Vec<String> {
        self.texts
            .lock()
            .unwrap()
            .iter()
            .filter(|(chat, _)| *chat == chat_id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    fn check(&self, chat_id: ChatId) -> Result<(), SendError> {
        if self.fail_for.lock().unwrap().contains(&chat_id) {
            Err(SendError(RequestError::Api(ApiError::BotBlocked)))
        } else {
            Ok(())
        }
    }
}

impl Outbound for RecordingOutbound {
    fn send_text(&self, chat_id: ChatId, text: String) -> BoxFuture<'_, Result<(), SendError>> {
        Box::pin(async move {
            self.check(chat_id)?;
            self.texts.lock().unwrap().push((chat_id, text));
            Ok(())
        })
    }

    fn send_image(&self, chat_id: ChatId, _image: Image) -> BoxFuture<'_, Result<(), SendError>> {
        Box::pin(async move {
            self.check(chat_id)?;
            self.pictures.lock().unwrap().push(chat_id);
            Ok(())
        })
    }
}
