use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::database::Subscription;

pub fn start() -> String {
    "Welcome to peepobot. Now you can use any available command.".to_string()
}

pub fn help() -> String {
    "Command list help:\n\
     /peepo - Get random picture;\n\
     /sub - Subscribe to receive pictures periodically;\n\
     /sub_info - Get info about current subscription;\n\
     /unsub - Drop current subscription;\n\
     /help - Get this list."
        .to_string()
}

pub fn cooldown(remaining: Duration) -> String {
    format!("Command on cooldown for {:.1} sec", remaining.as_secs_f64())
}

pub fn commands_only() -> String {
    "I can only handle listed commands in this chat!".to_string()
}

pub fn unknown_command() -> String {
    "Unknown command".to_string()
}

pub fn subscribed() -> String {
    "Subscribed! You will receive pictures periodically.".to_string()
}

pub fn already_subscribed(since: DateTime<Utc>) -> String {
    format!("You are already subscribed since {}.", format_time(since))
}

pub fn subscription_info(subscription: Option<&Subscription>) -> String {
    match subscription {
        Some(sub) => format!("You are subscribed since {}.", format_time(sub.created_at)),
        None => no_subscription(),
    }
}

pub fn unsubscribed(removed: bool) -> String {
    if removed {
        "Subscription dropped 👍".to_string()
    } else {
        no_subscription()
    }
}

pub fn no_subscription() -> String {
    "You have no active subscription.".to_string()
}

pub fn picture_unavailable() -> String {
    "Couldn't fetch a picture right now, please try again later.".to_string()
}

pub fn internal_error() -> String {
    "Sorry, an internal error occurred :((".to_string()
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
