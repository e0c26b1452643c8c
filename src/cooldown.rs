//! Per-requester creation throttling

use crate::core::UserId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Minimum interval between two granted ticket creations by one requester
///
/// Only granted attempts move the window; a denied attempt leaves the
/// recorded timestamp alone.
#[derive(Debug)]
pub struct CooldownGuard {
    window: Duration,
    granted: Mutex<HashMap<UserId, Instant>>,
}

impl CooldownGuard {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            granted: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    fn granted(&self) -> MutexGuard<'_, HashMap<UserId, Instant>> {
        self.granted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check and record in one step
    ///
    /// Returns the time left in the window when the attempt is denied.
    pub fn try_acquire(&self, requester: UserId) -> Result<(), Duration> {
        let now = Instant::now();
        let mut granted = self.granted();
        self.prune_locked(&mut granted, now);

        if let Some(last) = granted.get(&requester) {
            let elapsed = now.duration_since(*last);
            if elapsed < self.window {
                return Err(self.window - elapsed);
            }
        }

        granted.insert(requester, now);
        Ok(())
    }

    /// Time until `requester` may create again; zero when unrestricted
    #[must_use]
    pub fn remaining(&self, requester: UserId) -> Duration {
        let now = Instant::now();
        self.granted().get(&requester).map_or(Duration::ZERO, |last| {
            self.window.saturating_sub(now.duration_since(*last))
        })
    }

    /// Drop entries whose window has passed
    pub fn prune(&self) {
        let now = Instant::now();
        let mut granted = self.granted();
        self.prune_locked(&mut granted, now);
    }

    /// Number of requesters still inside their window
    #[must_use]
    pub fn len(&self) -> usize {
        self.granted().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune_locked(&self, granted: &mut HashMap<UserId, Instant>, now: Instant) {
        granted.retain(|_, last| now.duration_since(*last) < self.window);
    }
}
