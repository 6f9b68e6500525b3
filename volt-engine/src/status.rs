//! Read-only status surface for operators and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;

use volt_core::{StrategyId, TerminalCause, UserId, UserStatus, Volume};

/// Everything externally observable about one `(strategy, user)` pair.
#[derive(Clone, Debug)]
pub struct UserRecord {
    pub status: UserStatus,
    pub last_volume: Option<Volume>,
    pub last_error: Option<String>,
}

impl Default for UserRecord {
    fn default() -> Self {
        Self {
            status: UserStatus::NotStarted,
            last_volume: None,
            last_error: None,
        }
    }
}

/// Aggregate view over one strategy's users.
#[derive(Clone, Debug, Default)]
pub struct StrategyProgress {
    pub users: usize,
    pub terminal: usize,
    pub succeeded: usize,
    pub total_volume: Volume,
}

/// Shared registry of per-user run state. Cheap to clone; all handles see
/// the same records.
#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<HashMap<(StrategyId, UserId), UserRecord>>>,
}

impl StatusBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, strategy_id: &str, user_id: UserId, status: UserStatus) {
        let mut inner = self.inner.lock().expect("status lock");
        inner
            .entry((strategy_id.to_string(), user_id))
            .or_default()
            .status = status;
    }

    pub fn record_volume(&self, strategy_id: &str, user_id: UserId, volume: Volume) {
        let mut inner = self.inner.lock().expect("status lock");
        inner
            .entry((strategy_id.to_string(), user_id))
            .or_default()
            .last_volume = Some(volume);
    }

    /// Mark a user terminal with the status its cause maps to, plus an
    /// optional operator-facing message.
    pub fn finish(
        &self,
        strategy_id: &str,
        user_id: UserId,
        cause: &TerminalCause,
        message: Option<String>,
    ) {
        let mut inner = self.inner.lock().expect("status lock");
        let record = inner
            .entry((strategy_id.to_string(), user_id))
            .or_default();
        record.status = cause.status();
        if message.is_some() {
            record.last_error = message;
        }
    }

    #[must_use]
    pub fn user(&self, strategy_id: &str, user_id: UserId) -> Option<UserRecord> {
        let inner = self.inner.lock().expect("status lock");
        inner.get(&(strategy_id.to_string(), user_id)).cloned()
    }

    #[must_use]
    pub fn strategy_users(&self, strategy_id: &str) -> Vec<(UserId, UserRecord)> {
        let inner = self.inner.lock().expect("status lock");
        let mut users: Vec<(UserId, UserRecord)> = inner
            .iter()
            .filter(|((sid, _), _)| sid == strategy_id)
            .map(|((_, uid), record)| (*uid, record.clone()))
            .collect();
        users.sort_by_key(|(uid, _)| *uid);
        users
    }

    #[must_use]
    pub fn strategy_progress(&self, strategy_id: &str) -> StrategyProgress {
        let users = self.strategy_users(strategy_id);
        let mut progress = StrategyProgress {
            users: users.len(),
            ..StrategyProgress::default()
        };
        for (_, record) in users {
            if record.status.is_terminal() {
                progress.terminal += 1;
            }
            if matches!(
                record.status,
                UserStatus::StoppedSuccess | UserStatus::FilteredSatisfied
            ) {
                progress.succeeded += 1;
            }
            progress.total_volume += record.last_volume.unwrap_or(Decimal::ZERO);
        }
        progress
    }
}
