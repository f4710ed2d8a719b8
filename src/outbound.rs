use futures_core::future::BoxFuture;
use teloxide::prelude::*;
use teloxide::types::InputFile;
use thiserror::Error;

use crate::database::Database;
use crate::images::{Image, ImagePayload};

#[derive(Debug, Error)]
#[error(transparent)]
pub struct SendError(#[from] pub teloxide::RequestError);

/// Send side of the transport. Errors are reported to the caller, which
/// decides whether to log or notify; they are never fatal.
pub trait Outbound: Send + Sync {
    fn send_text(&self, chat_id: ChatId, text: String) -> BoxFuture<'_, Result<(), SendError>>;
    fn send_image(&self, chat_id: ChatId, image: Image) -> BoxFuture<'_, Result<(), SendError>>;
}

pub struct TelegramSender {
    bot: Bot,
    db: Database,
}

impl TelegramSender {
    pub fn new(bot: Bot, db: Database) -> Self {
        Self { bot, db }
    }
}

impl Outbound for TelegramSender {
    fn send_text(&self, chat_id: ChatId, text: String) -> BoxFuture<'_, Result<(), SendError>> {
        Box::pin(async move {
            self.bot.send_message(chat_id, text).await?;
            Ok(())
        })
    }

    fn send_image(&self, chat_id: ChatId, image: Image) -> BoxFuture<'_, Result<(), SendError>> {
        Box::pin(async move {
            match image.payload {
                ImagePayload::FileId(file_id) => {
                    self.bot
                        .send_photo(chat_id, InputFile::file_id(file_id))
                        .await?;
                }
                ImagePayload::Path(path) => {
                    let sent = self.bot.send_photo(chat_id, InputFile::file(path)).await?;
                    // remember the uploaded file so the next send skips the upload
                    if let Some(file_id) = largest_photo_id(&sent) {
                        if let Err(e) = self.db.store_file_id(&image.name, file_id).await {
                            log::warn!("Couldn't cache file id for {}: {e}", image.name);
                        }
                    }
                }
            }
            Ok(())
        })
    }
}

fn largest_photo_id(message: &Message) -> Option<&str> {
    // photo sizes come sorted ascending, the last one is the original
    message.photo()?.last().map(|size| size.file.id.as_str())
}
