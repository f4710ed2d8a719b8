use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use teloxide::types::ChatId;
use tokio::time::{interval, Instant, MissedTickBehavior};

// Entries idle for this many windows are dropped by the background sweep.
const RETENTION_FACTOR: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Denied { remaining: Duration },
}

pub struct CooldownGate {
    window: Duration,
    last_admitted: Mutex<HashMap<ChatId, Instant>>,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Arc<Self> {
        let gate = Arc::new(Self {
            window,
            last_admitted: Mutex::new(HashMap::new()),
        });

        spawn_sweeper(Arc::downgrade(&gate), window);

        gate
    }

    /// Decides whether a chat may run a command right now. The last-admitted
    /// timestamp is written on admission only; denials leave it untouched.
    pub fn admit(&self, chat_id: ChatId) -> Admission {
        let now = Instant::now();
        let mut last_admitted = self.last_admitted.lock().unwrap();

        if let Some(&admitted_at) = last_admitted.get(&chat_id) {
            let elapsed = now - admitted_at;
            if elapsed < self.window {
                return Admission::Denied {
                    remaining: round_up_to_tenth(self.window - elapsed),
                };
            }
        }

        last_admitted.insert(chat_id, now);
        Admission::Admitted
    }

    fn sweep(&self) {
        let retention = self.window * RETENTION_FACTOR;
        let now = Instant::now();
        let mut last_admitted = self.last_admitted.lock().unwrap();

        let before = last_admitted.len();
        last_admitted.retain(|_, admitted_at| now - *admitted_at < retention);

        let evicted = before - last_admitted.len();
        if evicted > 0 {
            log::debug!("Evicted {evicted} idle cooldown entries");
        }
    }

    #[cfg(test)]
    fn tracked_chats(&self) -> usize {
        self.last_admitted.lock().unwrap().len()
    }
}

fn spawn_sweeper(gate: Weak<CooldownGate>, window: Duration) {
    tokio::spawn(async move {
        // window may be arbitrarily small; don't let the sweep spin
        let mut tick = interval(window.max(Duration::from_secs(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tick.tick().await;
            let Some(gate) = gate.upgrade() else { break };
            gate.sweep();
        }
    });
}

fn round_up_to_tenth(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis().div_ceil(100) as u64 * 100)
}
