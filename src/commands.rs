use std::sync::Arc;

use chrono::Utc;
use teloxide::types::ChatId;
use teloxide::utils::command::BotCommands;

use crate::database::{Database, NewSubscription};
use crate::images::ContentSource;
use crate::messages;
use crate::outbound::Outbound;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "snake_case")]
pub enum Command {
    #[command(description = "start talking to the bot.")]
    Start,
    #[command(description = "get the command list.")]
    Help,
    #[command(description = "get a random picture.")]
    Peepo,
    #[command(description = "subscribe to periodic pictures.")]
    Sub,
    #[command(description = "drop the current subscription.")]
    Unsub,
    #[command(description = "show the current subscription.")]
    SubInfo,
}

#[derive(Debug, PartialEq)]
pub enum Route {
    NotCommand,
    Unknown,
    Command(Command),
}

/// Classifies admitted message text. Anything that doesn't look like a
/// command gets the generic notice; a command-shaped token outside the
/// known set gets the unknown-command notice.
pub fn classify(text: &str, bot_username: &str) -> Route {
    if !text.starts_with('/') {
        return Route::NotCommand;
    }

    match Command::parse(text, bot_username) {
        Ok(command) => Route::Command(command),
        Err(_) => Route::Unknown,
    }
}

#[derive(Clone)]
pub struct Context {
    pub db: Database,
    pub source: Arc<dyn ContentSource>,
    pub outbound: Arc<dyn Outbound>,
}

impl Context {
    pub async fn reply(&self, chat_id: ChatId, text: String) {
        if let Err(e) = self.outbound.send_text(chat_id, text).await {
            log::warn!("Couldn't send message to {chat_id}: {e}");
        }
    }
}

pub async fn handle(ctx: Context, chat_id: ChatId, command: Command) {
    match command {
        Command::Start => ctx.reply(chat_id, messages::start()).await,
        Command::Help => ctx.reply(chat_id, messages::help()).await,
        Command::Peepo => send_picture(&ctx, chat_id).await,
        Command::Sub => subscribe(&ctx, chat_id).await,
        Command::Unsub => unsubscribe(&ctx, chat_id).await,
        Command::SubInfo => subscription_info(&ctx, chat_id).await,
    }
}

async fn send_picture(ctx: &Context, chat_id: ChatId) {
    let image = match ctx.source.pick().await {
        Ok(image) => image,
        Err(e) => {
            log::warn!("{chat_id}: failed to pick a picture: {e}");
            ctx.reply(chat_id, messages::picture_unavailable()).await;
            return;
        }
    };

    if let Err(e) = ctx.outbound.send_image(chat_id, image).await {
        log::warn!("Couldn't send picture to {chat_id}: {e}");
    }
}

async fn subscribe(ctx: &Context, chat_id: ChatId) {
    let reply = match ctx.db.add_subscription(chat_id, Utc::now()).await {
        Ok(NewSubscription::Created(_)) => messages::subscribed(),
        Ok(NewSubscription::AlreadyExists(existing)) => {
            messages::already_subscribed(existing.created_at)
        }
        Err(e) => {
            log::error!("Database error: {e}");
            messages::internal_error()
        }
    };

    ctx.reply(chat_id, reply).await;
}

async fn unsubscribe(ctx: &Context, chat_id: ChatId) {
    let reply = match ctx.db.remove_subscription(chat_id).await {
        Ok(removed) => messages::unsubscribed(removed),
        Err(e) => {
            log::error!("Database error: {e}");
            messages::internal_error()
        }
    };

    ctx.reply(chat_id, reply).await;
}

async fn subscription_info(ctx: &Context, chat_id: ChatId) {
    let reply = match ctx.db.get_subscription(chat_id).await {
        Ok(subscription) => messages::subscription_info(subscription.as_ref()),
        Err(e) => {
            log::error!("Database error: {e}");
            messages::internal_error()
        }
    };

    ctx.reply(chat_id, reply).await;
}
