//! Timer helpers backing the election-timeout checker and heartbeat ticker.

use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use tokio::sync::Mutex;

/// Shared "last time we heard from a leader" clock. Touched by the peer
/// transport's reader task on every `AppendEntriesRequest`; read by the
/// election-timeout checker.
pub struct LastContact(Mutex<Instant>);

impl LastContact {
    pub fn new() -> Self {
        LastContact(Mutex::new(Instant::now()))
    }

    /// Resets the clock to now.
    pub async fn touch(&self) {
        *self.0.lock().await = Instant::now();
    }

    /// Time elapsed since the clock was last touched.
    pub async fn elapsed(&self) -> Duration {
        self.0.lock().await.elapsed()
    }
}

impl Default for LastContact {
    fn default() -> Self {
        Self::new()
    }
}

/// Randomized election-timeout checker. Each call to [`ElectionTimer::tick`]
/// sleeps for `check_frequency` plus a uniformly-chosen multiplier from
/// `{0, 2, 4, 8, 16}` of that same base period -- the randomization spreads
/// out election attempts across peers so they do not all time out at once --
/// then reports whether `last_contact` has been silent for longer than
/// `max_wait`.
pub struct ElectionTimer {
    check_frequency: Duration,
    max_wait: Duration,
}

const RANDOM_MULTIPLIERS: [u32; 5] = [0, 2, 4, 8, 16];

impl ElectionTimer {
    pub fn new(check_frequency: Duration, max_wait: Duration) -> Self {
        ElectionTimer {
            check_frequency,
            max_wait,
        }
    }

    /// Sleeps one randomized interval, then returns `true` if a leader
    /// checkin timeout has occurred.
    pub async fn tick(&self, last_contact: &LastContact) -> bool {
        let multiplier = *RANDOM_MULTIPLIERS
            .choose(&mut rand::thread_rng())
            .expect("RANDOM_MULTIPLIERS is non-empty");
        let wait = self.check_frequency + self.check_frequency * multiplier;
        tokio::time::sleep(wait).await;
        last_contact.elapsed().await > self.max_wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_contact_has_no_timeout() {
        let lc = LastContact::new();
        assert!(lc.elapsed().await < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn touch_resets_clock() {
        let lc = LastContact::new();
        tokio::time::sleep(Duration::from_millis(20)).await;
        lc.touch().await;
        assert!(lc.elapsed().await < Duration::from_millis(15));
    }
}
