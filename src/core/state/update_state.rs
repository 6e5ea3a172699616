use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{NovmError, NovmResult};

/// No two checks closer together than this many seconds.
pub const MIN_CHECK_INTERVAL_SECS: i64 = 60;
/// Window over which [`MAX_CHECKS_PER_WINDOW`] applies.
pub const CHECK_WINDOW_SECS: i64 = 60 * 60;
pub const MAX_CHECKS_PER_WINDOW: u32 = 60;

/// Contents of `root/state.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateState {
    #[serde(default)]
    pub update: UpdateThrottle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateThrottle {
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub times_checked: u32,
}

impl UpdateState {
    /// A missing file is a fresh state; an unreadable one is an error.
    pub async fn load(path: &Path) -> NovmResult<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(NovmError::io(path, source)),
        }
    }

    pub async fn save(&self, path: &Path) -> NovmResult<()> {
        let payload = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, payload)
            .await
            .map_err(|source| NovmError::io(path, source))
    }

    pub fn should_check(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.update.last_checked else {
            return true;
        };
        let since = now.signed_duration_since(last);

        if since < Duration::seconds(MIN_CHECK_INTERVAL_SECS) {
            return false;
        }
        since >= Duration::seconds(CHECK_WINDOW_SECS) || self.update.times_checked < MAX_CHECKS_PER_WINDOW
    }

    /// Count a check at `now`, starting a new window when the last one is
    /// an hour or more old.
    pub fn record_check(&mut self, now: DateTime<Utc>) {
        let window_expired = self
            .update
            .last_checked
            .map(|last| now.signed_duration_since(last) >= Duration::seconds(CHECK_WINDOW_SECS))
            .unwrap_or(true);

        self.update.times_checked = if window_expired {
            1
        } else {
            self.update.times_checked.saturating_add(1)
        };
        self.update.last_checked = Some(now);
        debug!("Update check #{} in current window", self.update.times_checked);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn first_run_checks() {
        assert!(UpdateState::default().should_check(at(0)));
    }

    #[test]
    fn throttles_within_a_minute() {
        let mut state = UpdateState::default();
        state.record_check(at(0));
        assert_eq!(state.update.times_checked, 1);
        assert!(!state.should_check(at(0)));
        assert!(state.should_check(at(1)));
    }

    #[test]
    fn counter_caps_and_resets_hourly() {
        let mut state = UpdateState::default();
        for minute in 0..MAX_CHECKS_PER_WINDOW as i64 {
            state.record_check(at(minute));
        }
        assert_eq!(state.update.times_checked, MAX_CHECKS_PER_WINDOW);
        assert!(!state.should_check(at(61)));

        let later = at(59 + 60);
        assert!(state.should_check(later));
        state.record_check(later);
        assert_eq!(state.update.times_checked, 1);
    }

    #[tokio::test]
    async fn persists_in_camel_case() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");
        assert_eq!(UpdateState::load(&path).await.unwrap(), UpdateState::default());

        let mut state = UpdateState::default();
        state.record_check(at(0));
        state.save(&path).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"lastChecked\""));
        assert!(raw.contains("\"timesChecked\": 1"));
        assert_eq!(UpdateState::load(&path).await.unwrap(), state);
    }

    #[test]
    fn reads_zero_time_from_older_files() {
        let raw = r#"{"update":{"lastChecked":"0001-01-01T00:00:00Z","timesChecked":0}}"#;
        let state: UpdateState = serde_json::from_str(raw).unwrap();
        assert!(state.should_check(at(0)));
    }
}
