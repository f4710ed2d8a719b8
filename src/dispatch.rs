use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, UpdateKind};
use teloxide::RequestError;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::commands::{self, Context, Route};
use crate::cooldown::{Admission, CooldownGate};
use crate::messages;

const POLL_TIMEOUT_SECS: u32 = 30;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);
const MAX_CONCURRENT_HANDLERS: usize = 64;

/// Top-level control loop: multiplexes inbound updates with the shutdown
/// signal. One update is taken off the wire at a time; the handlers it
/// triggers run as independent tasks so a slow chat never delays the pump.
pub struct DispatchLoop {
    bot: Bot,
    bot_username: String,
    gate: Arc<CooldownGate>,
    ctx: Context,
    shutdown_grace: Duration,
}

impl DispatchLoop {
    pub fn new(
        bot: Bot,
        bot_username: String,
        gate: Arc<CooldownGate>,
        ctx: Context,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            bot,
            bot_username,
            gate,
            ctx,
            shutdown_grace,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let limiter = Arc::new(Semaphore::new(MAX_CONCURRENT_HANDLERS));
        let mut handlers: JoinSet<()> = JoinSet::new();
        let mut offset: i32 = 0;

        loop {
            while let Some(finished) = handlers.try_join_next() {
                reap(finished);
            }

            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.poll_updates(offset) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = update.id.as_offset();
                        self.process_update(update, &limiter, &mut handlers);
                    }
                }
                Err(e) => {
                    log::warn!("Failed to fetch updates: {e}");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                    }
                }
            }
        }

        log::info!("Stopped receiving updates");
        self.drain(handlers).await;
    }

    async fn poll_updates(&self, offset: i32) -> Result<Vec<Update>, RequestError> {
        self.bot
            .get_updates()
            .offset(offset)
            .timeout(POLL_TIMEOUT_SECS)
            .allowed_updates(vec![AllowedUpdate::Message])
            .await
    }

    fn process_update(
        &self,
        update: Update,
        limiter: &Arc<Semaphore>,
        handlers: &mut JoinSet<()>,
    ) {
        let UpdateKind::Message(message) = update.kind else {
            return;
        };

        let chat_id = message.chat.id;

        // an update without text is dropped without a response
        let Some(text) = message.text() else {
            return;
        };

        if let Admission::Denied { remaining } = self.gate.admit(chat_id) {
            self.spawn_reply(handlers, chat_id, messages::cooldown(remaining));
            return;
        }

        match commands::classify(text, &self.bot_username) {
            Route::NotCommand => self.spawn_reply(handlers, chat_id, messages::commands_only()),
            Route::Unknown => self.spawn_reply(handlers, chat_id, messages::unknown_command()),
            Route::Command(command) => {
                let ctx = self.ctx.clone();
                let limiter = Arc::clone(limiter);
                handlers.spawn(async move {
                    let Ok(_permit) = limiter.acquire_owned().await else {
                        return;
                    };
                    commands::handle(ctx, chat_id, command).await;
                });
            }
        }
    }

    fn spawn_reply(&self, handlers: &mut JoinSet<()>, chat_id: ChatId, text: String) {
        let ctx = self.ctx.clone();
        handlers.spawn(async move {
            ctx.reply(chat_id, text).await;
        });
    }

    async fn drain(&self, mut handlers: JoinSet<()>) {
        if handlers.is_empty() {
            return;
        }

        log::info!("Waiting for {} in-flight command handlers", handlers.len());

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(finished) = handlers.join_next().await {
                reap(finished);
            }
        })
        .await;

        if drained.is_err() {
            log::warn!("Grace period expired, aborting remaining handlers");
            handlers.shutdown().await;
        }
    }
}

fn reap(finished: Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        if e.is_panic() {
            log::error!("Command handler panicked: {e}");
        }
    }
}
