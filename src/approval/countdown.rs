//! One-second ticker bound to the active approval request.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Tick period of the approval countdown.
pub const TICK: Duration = Duration::from_secs(1);

/// Ticker armed for at most one request id at a time.
///
/// Re-arming for a different id drops the old interval, so a tick can never
/// be attributed to a request that has already resolved.
#[derive(Debug, Default)]
pub struct Countdown {
    armed: Option<(String, Interval)>,
}

impl Countdown {
    /// Disarmed ticker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for `active`, keep the current timer if it is already armed for
    /// that id, or disarm when `None`.
    pub fn sync(&mut self, active: Option<&str>) {
        match (active, self.armed.as_ref()) {
            (Some(id), Some((armed_id, _))) if armed_id == id => {}
            (Some(id), _) => {
                debug!(request_id = id, "approval countdown armed");
                let mut interval = interval_at(Instant::now() + TICK, TICK);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.armed = Some((id.to_owned(), interval));
            }
            (None, Some((armed_id, _))) => {
                debug!(request_id = %armed_id, "approval countdown disarmed");
                self.armed = None;
            }
            (None, None) => {}
        }
    }

    /// Request id the ticker is armed for.
    #[must_use]
    pub fn armed_for(&self) -> Option<&str> {
        self.armed.as_ref().map(|(id, _)| id.as_str())
    }

    /// Wait for the next tick and return the id it belongs to.
    ///
    /// Never completes while disarmed. Cancel-safe.
    pub async fn tick(&mut self) -> String {
        match self.armed.as_mut() {
            Some((id, interval)) => {
                interval.tick().await;
                id.clone()
            }
            None => std::future::pending().await,
        }
    }
}
