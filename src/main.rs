mod commands;
mod config;
mod cooldown;
mod database;
mod delivery;
mod dispatch;
mod images;
mod messages;
mod outbound;
#[cfg(test)]
mod testutil;

use std::sync::Arc;

use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;

use crate::commands::Context;
use crate::config::Config;
use crate::cooldown::CooldownGate;
use crate::database::Database;
use crate::delivery::DeliveryScheduler;
use crate::dispatch::DispatchLoop;
use crate::images::ImageLibrary;
use crate::outbound::TelegramSender;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();
    log::info!("Starting bot...");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::from_env();
    let me = match bot.get_me().await {
        Ok(me) => me,
        Err(e) => {
            log::error!("Error creating bot: {e}");
            std::process::exit(1);
        }
    };
    let bot_username = me.username.clone().unwrap_or_default();
    log::info!("Authorized as @{bot_username}");

    let database = match Database::new(&config.database_url).await {
        Ok(database) => database,
        Err(e) => {
            log::error!("Error connecting to database: {e}");
            std::process::exit(1);
        }
    };

    let library = match ImageLibrary::new(&config.images_dir, database.clone()) {
        Ok(library) => library,
        Err(e) => {
            log::error!("Error loading image library: {e}");
            std::process::exit(1);
        }
    };

    let ctx = Context {
        db: database.clone(),
        source: Arc::new(library),
        outbound: Arc::new(TelegramSender::new(bot.clone(), database.clone())),
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let scheduler = DeliveryScheduler::new(
        database.clone(),
        Arc::clone(&ctx.source),
        Arc::clone(&ctx.outbound),
        config.delivery_interval,
        config.shutdown_grace,
    );
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));

    let gate = CooldownGate::new(config.command_cooldown);
    DispatchLoop::new(bot, bot_username, gate, ctx, config.shutdown_grace)
        .run(shutdown)
        .await;

    if let Err(e) = scheduler_task.await {
        log::error!("Delivery scheduler task failed: {e}");
    }
    database.close().await;

    log::info!("Bot gracefully stopped!");
}

async fn watch_signals(shutdown: CancellationToken) {
    wait_for_signal().await;
    log::info!("Stopping bot...");
    shutdown.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            log::warn!("Cannot listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
