use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use teloxide::types::ChatId;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::database::Database;
use crate::images::ContentSource;
use crate::outbound::Outbound;

/// Recurring picture delivery to every subscribed chat, decoupled from
/// inbound traffic. One global tick; each chat is delivered to by its own
/// task, with at most one in-flight delivery per chat.
pub struct DeliveryScheduler {
    db: Database,
    source: Arc<dyn ContentSource>,
    outbound: Arc<dyn Outbound>,
    period: Duration,
    grace: Duration,
    in_flight: Arc<Mutex<HashSet<ChatId>>>,
}

// Removes the chat from the in-flight set however the delivery task ends.
struct InFlightGuard {
    chat_id: ChatId,
    in_flight: Arc<Mutex<HashSet<ChatId>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap().remove(&self.chat_id);
    }
}

impl DeliveryScheduler {
    pub fn new(
        db: Database,
        source: Arc<dyn ContentSource>,
        outbound: Arc<dyn Outbound>,
        period: Duration,
        grace: Duration,
    ) -> Self {
        Self {
            db,
            source,
            outbound,
            period,
            grace,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        log::info!("Delivery scheduler started, period {:?}", self.period);

        let mut tick = interval_at(Instant::now() + self.period, self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut deliveries: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => self.start_cycle(&mut deliveries).await,
                Some(finished) = deliveries.join_next(), if !deliveries.is_empty() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            log::error!("Delivery task panicked: {e}");
                        }
                    }
                }
            }
        }

        self.drain(deliveries).await;
        log::info!("Delivery scheduler stopped");
    }

    async fn start_cycle(&self, deliveries: &mut JoinSet<()>) {
        let subscriptions = match self.db.active_subscriptions().await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                log::error!("Database error, skipping delivery cycle: {e}");
                return;
            }
        };

        log::debug!(
            "Delivery cycle: {} active subscriptions",
            subscriptions.len()
        );

        for subscription in subscriptions {
            let chat_id = ChatId(subscription.chat_id);

            if !self.in_flight.lock().unwrap().insert(chat_id) {
                log::debug!("{chat_id}: previous delivery still running, skipping");
                continue;
            }

            let guard = InFlightGuard {
                chat_id,
                in_flight: Arc::clone(&self.in_flight),
            };
            let db = self.db.clone();
            let source = Arc::clone(&self.source);
            let outbound = Arc::clone(&self.outbound);

            deliveries.spawn(async move {
                let _guard = guard;
                deliver(db, source, outbound, chat_id).await;
            });
        }
    }

    async fn drain(&self, mut deliveries: JoinSet<()>) {
        if deliveries.is_empty() {
            return;
        }

        log::info!(
            "Waiting up to {:?} for {} in-flight deliveries",
            self.grace,
            deliveries.len()
        );

        let drained = tokio::time::timeout(self.grace, async {
            while deliveries.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            log::warn!("Grace period expired, aborting remaining deliveries");
            deliveries.shutdown().await;
        }
    }
}

async fn deliver(
    db: Database,
    source: Arc<dyn ContentSource>,
    outbound: Arc<dyn Outbound>,
    chat_id: ChatId,
) {
    // the subscription may have been dropped since the cycle listed it
    match db.get_subscription(chat_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            log::debug!("{chat_id}: subscription gone before delivery, skipping");
            return;
        }
        Err(e) => {
            log::warn!("{chat_id}: subscription check failed, skipping delivery: {e}");
            return;
        }
    }

    let image = match source.pick().await {
        Ok(image) => image,
        Err(e) => {
            log::warn!("{chat_id}: no picture this cycle: {e}");
            return;
        }
    };

    if let Err(e) = outbound.send_image(chat_id, image).await {
        log::warn!("{chat_id}: delivery failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::Utc;

    use super::*;
    use crate::testutil::{GatedSource, RecordingOutbound, StaticSource};

    fn scheduler(
        db: Database,
        source: Arc<dyn ContentSource>,
        outbound: Arc<dyn Outbound>,
    ) -> DeliveryScheduler {
        DeliveryScheduler::new(
            db,
            source,
            outbound,
            Duration::from_millis(50),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn deliveries_to_one_chat_never_overlap() {
        let db = Database::in_memory().await.unwrap();
        db.add_subscription(ChatId(1), Utc::now()).await.unwrap();

        let source = Arc::new(GatedSource::new());
        let outbound = Arc::new(RecordingOutbound::new());
        let scheduler = scheduler(db, source.clone(), outbound.clone());
        let mut deliveries = JoinSet::new();

        scheduler.start_cycle(&mut deliveries).await;
        assert_eq!(deliveries.len(), 1);

        // the first delivery is still blocked in the content fetch; a second
        // tick must not start another one for the same chat
        scheduler.start_cycle(&mut deliveries).await;
        scheduler.start_cycle(&mut deliveries).await;
        assert_eq!(deliveries.len(), 1);

        source.release.add_permits(1);
        deliveries.join_next().await.unwrap().unwrap();
        assert_eq!(source.picks.load(Ordering::SeqCst), 1);

        // once it finished, the next cycle delivers again
        scheduler.start_cycle(&mut deliveries).await;
        assert_eq!(deliveries.len(), 1);
        source.release.add_permits(1);
        deliveries.join_next().await.unwrap().unwrap();

        assert_eq!(*outbound.pictures.lock().unwrap(), vec![ChatId(1), ChatId(1)]);
    }

    #[tokio::test]
    async fn one_chats_failure_does_not_block_the_other() {
        let db = Database::in_memory().await.unwrap();
        db.add_subscription(ChatId(1), Utc::now()).await.unwrap();
        db.add_subscription(ChatId(2), Utc::now()).await.unwrap();

        let outbound = Arc::new(RecordingOutbound::new());
        outbound.fail_sends_to(ChatId(1));

        let scheduler = scheduler(db, Arc::new(StaticSource), outbound.clone());
        let mut deliveries = JoinSet::new();

        scheduler.start_cycle(&mut deliveries).await;
        assert_eq!(deliveries.len(), 2);
        while deliveries.join_next().await.is_some() {}

        assert_eq!(*outbound.pictures.lock().unwrap(), vec![ChatId(2)]);
    }

    #[tokio::test]
    async fn no_send_without_a_subscription_at_send_time() {
        let db = Database::in_memory().await.unwrap();
        db.add_subscription(ChatId(1), Utc::now()).await.unwrap();

        let source = Arc::new(GatedSource::new());
        let outbound = Arc::new(RecordingOutbound::new());

        // unsubscribed after the cycle would have listed the chat
        db.remove_subscription(ChatId(1)).await.unwrap();
        deliver(db, source.clone(), outbound.clone(), ChatId(1)).await;

        assert_eq!(source.picks.load(Ordering::SeqCst), 0);
        assert!(outbound.pictures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_skips_the_cycle_but_keeps_the_subscription() {
        let db = Database::in_memory().await.unwrap();
        db.add_subscription(ChatId(1), Utc::now()).await.unwrap();

        let outbound = Arc::new(RecordingOutbound::new());
        deliver(
            db.clone(),
            Arc::new(crate::testutil::FailingSource),
            outbound.clone(),
            ChatId(1),
        )
        .await;

        assert!(outbound.pictures.lock().unwrap().is_empty());
        assert!(db.get_subscription(ChatId(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn run_delivers_on_the_tick_and_stops_on_cancel() {
        let db = Database::in_memory().await.unwrap();
        db.add_subscription(ChatId(1), Utc::now()).await.unwrap();

        let outbound = Arc::new(RecordingOutbound::new());
        let scheduler = scheduler(db, Arc::new(StaticSource), outbound.clone());

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(shutdown.clone()));

        // period is 50ms; wait until at least one delivery happened
        let mut waited = Duration::ZERO;
        while outbound.pictures.lock().unwrap().is_empty() && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        assert!(!outbound.pictures.lock().unwrap().is_empty());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
