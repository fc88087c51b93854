// src/anticheat/correlator.rs
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::Arc;

use super::AntiCheatError;
use crate::config::{Action, AnticheatConfig, ResetScope};
use crate::error::{FleetError, StoreError};
use crate::models::anticheat::{Detection, StacEntry};
use crate::models::person::{BanRequest, Notification};
use crate::ports::{BanService, Notifier};
use crate::state::Fleet;
use crate::steamid::SteamId;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: DateTime<Utc>,
}

/// Rolling per (player, detection) counters.
pub struct DetectionCounter {
    windows: DashMap<(SteamId, Detection), Window>,
    window: Duration,
    scope: ResetScope,
}

impl DetectionCounter {
    pub fn new(window: Duration, scope: ResetScope) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            scope,
        }
    }

    /// Counts one detection seen at `at`. Returns the count when this
    /// observation reaches `threshold`; the counter is reset in the same step
    /// so concurrent callers see at most one crossing. A zero threshold
    /// disables counting.
    pub fn observe(&self, steam_id: SteamId, detection: Detection, at: DateTime<Utc>, threshold: u32) -> Option<u32> {
        if threshold == 0 {
            return None;
        }

        let mut window = self
            .windows
            .entry((steam_id, detection))
            .or_insert(Window { count: 0, started: at });
        if at - window.started >= self.window {
            *window = Window { count: 0, started: at };
        }
        window.count += 1;
        if window.count < threshold {
            return None;
        }

        let count = window.count;
        *window = Window { count: 0, started: at };
        drop(window);

        if self.scope == ResetScope::Player {
            self.windows.retain(|(sid, _), _| *sid != steam_id);
        }
        Some(count)
    }

    /// Drops windows that expired as of `now`. Returns how many were removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| now - w.started < self.window);
        before.saturating_sub(self.windows.len())
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn count(&self, steam_id: SteamId, detection: Detection) -> u32 {
        self.windows
            .get(&(steam_id, detection))
            .map(|w| w.count)
            .unwrap_or_default()
    }
}

/// Executes the configured action once a threshold is crossed.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, entry: &StacEntry, action: Action, count: u32) -> Result<(), AntiCheatError>;
}

/// Acts through the fleet dispatcher and the ban service.
pub struct FleetResponder {
    fleet: Arc<Fleet>,
    bans: Arc<dyn BanService>,
    notifier: Arc<dyn Notifier>,
    owner: Option<SteamId>,
    duration_secs: Option<u64>,
}

impl FleetResponder {
    pub fn new(
        fleet: Arc<Fleet>,
        bans: Arc<dyn BanService>,
        notifier: Arc<dyn Notifier>,
        config: &AnticheatConfig,
    ) -> Self {
        let owner = match config.owner.trim() {
            "" => None,
            raw => match raw.parse() {
                Ok(sid) => Some(sid),
                Err(e) => {
                    warn!("Ignoring anticheat owner: {}", e);
                    None
                }
            },
        };
        Self {
            fleet,
            bans,
            notifier,
            owner,
            duration_secs: config.ban_duration(),
        }
    }

    /// A player who already left is not an error.
    fn tolerate_absent(result: Result<(), FleetError>) -> Result<(), AntiCheatError> {
        match result {
            Err(FleetError::PlayerNotFound) => {
                debug!("Player no longer connected, nothing to act on");
                Ok(())
            }
            other => Ok(other?),
        }
    }
}

#[async_trait]
impl Responder for FleetResponder {
    async fn respond(&self, entry: &StacEntry, action: Action, count: u32) -> Result<(), AntiCheatError> {
        let steam_id = entry
            .steam_id
            .ok_or_else(|| AntiCheatError::InvalidSteamId(entry.name.clone()))?;
        let reason = format!("Cheating ({})", entry.detection);

        match action {
            Action::Kick => Self::tolerate_absent(self.fleet.kick(steam_id, &reason).await)?,
            Action::Mute => Self::tolerate_absent(self.fleet.silence(steam_id, &reason).await)?,
            Action::Ban => {
                let request = BanRequest {
                    source_id: self.owner,
                    target_id: steam_id,
                    duration_secs: self.duration_secs,
                    reason: reason.clone(),
                    note: format!("{}\n\nRaw log:\n{}", entry.summary, entry.raw_log),
                    demo_name: entry.demo_name.clone(),
                    demo_tick: entry.demo_tick,
                };
                match self.bans.ban(request).await {
                    Ok(ban) => info!("Banned {} for {} (ban {})", steam_id, entry.detection, ban.ban_id),
                    Err(StoreError::Duplicate) => debug!("{} is already banned", steam_id),
                    Err(e) => return Err(e.into()),
                }
                Self::tolerate_absent(self.fleet.kick(steam_id, &reason).await)?;
            }
        }

        self.notifier.send(Notification::AnticheatTrigger {
            steam_id,
            name: entry.name.clone(),
            server_id: entry.server_id,
            detection: entry.detection,
            action,
            count,
            summary: entry.summary.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sid() -> SteamId {
        "STEAM_0:1:59129186".parse().unwrap()
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 22, 1, minute, 0).unwrap()
    }

    #[test]
    fn fires_once_per_crossing() {
        let counter = DetectionCounter::new(Duration::hours(1), ResetScope::Detection);
        assert_eq!(counter.observe(sid(), Detection::SilentAim, at(0), 3), None);
        assert_eq!(counter.observe(sid(), Detection::SilentAim, at(1), 3), None);
        assert_eq!(counter.observe(sid(), Detection::SilentAim, at(2), 3), Some(3));
        // Fourth lands in a fresh window
        assert_eq!(counter.observe(sid(), Detection::SilentAim, at(3), 3), None);
        assert_eq!(counter.count(sid(), Detection::SilentAim), 1);
    }

    #[test]
    fn expired_window_restarts_count() {
        let counter = DetectionCounter::new(Duration::minutes(10), ResetScope::Detection);
        counter.observe(sid(), Detection::Bhop, at(0), 2);
        assert_eq!(counter.observe(sid(), Detection::Bhop, at(30), 2), None);
        assert_eq!(counter.observe(sid(), Detection::Bhop, at(31), 2), Some(2));
    }

    #[test]
    fn reset_scope_controls_other_counters() {
        let counter = DetectionCounter::new(Duration::hours(1), ResetScope::Detection);
        counter.observe(sid(), Detection::Bhop, at(0), 5);
        counter.observe(sid(), Detection::OobCvar, at(1), 1);
        assert_eq!(counter.count(sid(), Detection::Bhop), 1);

        let counter = DetectionCounter::new(Duration::hours(1), ResetScope::Player);
        counter.observe(sid(), Detection::Bhop, at(0), 5);
        counter.observe(sid(), Detection::OobCvar, at(1), 1);
        assert_eq!(counter.count(sid(), Detection::Bhop), 0);
    }

    #[test]
    fn prune_drops_expired_windows() {
        let counter = DetectionCounter::new(Duration::minutes(10), ResetScope::Detection);
        let other: SteamId = "STEAM_0:0:123751210".parse().unwrap();
        counter.observe(sid(), Detection::Bhop, at(0), 5);
        counter.observe(other, Detection::Bhop, at(8), 5);
        assert_eq!(counter.len(), 2);

        assert_eq!(counter.prune(at(12)), 1);
        assert_eq!(counter.count(sid(), Detection::Bhop), 0);
        assert_eq!(counter.count(other, Detection::Bhop), 1);
        assert_eq!(counter.prune(at(30)), 1);
        assert!(counter.is_empty());
    }

    #[test]
    fn zero_threshold_never_fires() {
        let counter = DetectionCounter::new(Duration::hours(1), ResetScope::Detection);
        for minute in 0..10 {
            assert_eq!(counter.observe(sid(), Detection::Interp, at(minute), 0), None);
        }
    }

    #[test]
    fn concurrent_observers_cross_once() {
        let counter = Arc::new(DetectionCounter::new(Duration::hours(1), ResetScope::Detection));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .filter(|_| counter.observe(sid(), Detection::AimSnap, at(0), 200).is_some())
                        .count()
                })
            })
            .collect();
        let fired: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(fired, 1);
    }
}
