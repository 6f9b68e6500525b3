//! Declarative fault injection for the mock exchange.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

/// Lifecycle event that can trigger a scripted behavior.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScenarioTrigger {
    /// An OTO placement request arrived.
    PlaceOto,
    /// A user-volume query arrived.
    VolumeQuery,
    /// A working-leg fill is about to advance the account's volume.
    VolumeBump,
}

/// Scripted behavior applied when the trigger fires.
#[derive(Clone, Debug)]
pub enum ScenarioAction {
    Delay(Duration),
    /// Answer with a business-error envelope instead of processing.
    Fail { code: String, message: String },
    /// Accept the placement but never emit fills for its legs.
    WithholdFills,
    /// Swallow one volume increment, emulating ledger lag.
    SkipVolumeBump,
}

impl ScenarioAction {
    /// The canonical credential-revocation payload.
    #[must_use]
    pub fn auth_failure() -> Self {
        Self::Fail {
            code: "100002001".into(),
            message: "session expired, please re-login".into(),
        }
    }
}

/// One scheduled behavior, optionally scoped to a single account.
#[derive(Clone, Debug)]
pub struct Scenario {
    pub name: String,
    pub trigger: ScenarioTrigger,
    /// Restrict to one account's auth token; `None` matches any account.
    pub account: Option<String>,
    pub action: ScenarioAction,
}

impl Scenario {
    pub fn new(
        name: impl Into<String>,
        trigger: ScenarioTrigger,
        action: ScenarioAction,
    ) -> Self {
        Self {
            name: name.into(),
            trigger,
            account: None,
            action,
        }
    }

    #[must_use]
    pub fn for_account(mut self, auth_token: impl Into<String>) -> Self {
        self.account = Some(auth_token.into());
        self
    }
}

/// Thread-safe queue of scripted scenarios. Each trigger consumes the first
/// matching entry.
#[derive(Clone, Default)]
pub struct ScenarioManager {
    inner: Arc<Mutex<Vec<Scenario>>>,
}

impl ScenarioManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, scenario: Scenario) {
        let mut guard = self.inner.lock().await;
        guard.push(scenario);
    }

    /// Drains and returns the first scenario matching the trigger and
    /// account.
    pub async fn take_for(
        &self,
        trigger: ScenarioTrigger,
        auth_token: &str,
    ) -> Option<ScenarioAction> {
        let mut guard = self.inner.lock().await;
        let position = guard.iter().position(|scenario| {
            scenario.trigger == trigger
                && scenario
                    .account
                    .as_deref()
                    .map_or(true, |account| account == auth_token)
        })?;
        Some(guard.remove(position).action)
    }

    pub async fn clear(&self) {
        let mut guard = self.inner.lock().await;
        guard.clear();
    }
}
