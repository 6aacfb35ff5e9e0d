// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Locally registered actions and their call schedule.
//!
//! Actions are named device operations ("open valve", "led on") that action
//! callbacks and the scheduler can invoke. An action can be given a call
//! delay; [`ActionRegistry::run_scheduled`] then calls it whenever that much
//! time has passed since its last call.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::{ActionError, Result};
use crate::settings::Settings;

/// Handler run when an action is called.
pub type ActionHandler = Arc<dyn Fn() -> std::result::Result<(), String> + Send + Sync>;

/// Public description of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionInfo {
    /// Unique action name.
    pub name: String,
    /// Human readable caption.
    pub caption: String,
    /// Scheduled call delay in milliseconds, `0` when not scheduled.
    pub call_delay: u64,
    /// Milliseconds since the last call, `None` if never called.
    pub last_call: Option<u64>,
}

impl ActionInfo {
    /// Creates an unscheduled, never called action description.
    #[must_use]
    pub fn new(name: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            caption: caption.into(),
            call_delay: 0,
            last_call: None,
        }
    }
}

/// Invokes actions by name.
pub trait ActionInvoker: Send + Sync {
    /// Calls the named action.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::NotFound`] for unknown names and
    /// [`ActionError::Failed`] if the handler fails.
    fn call_action(&self, name: &str) -> std::result::Result<(), ActionError>;

    /// Describes every available action.
    fn actions_info(&self) -> Vec<ActionInfo>;
}

/// An [`ActionInvoker`] without any action.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoActions;

impl ActionInvoker for NoActions {
    fn call_action(&self, name: &str) -> std::result::Result<(), ActionError> {
        Err(ActionError::NotFound(name.to_string()))
    }

    fn actions_info(&self) -> Vec<ActionInfo> {
        Vec::new()
    }
}

struct Action {
    name: String,
    caption: String,
    handler: ActionHandler,
    call_delay: Duration,
    scheduled_since: Instant,
    last_call: Option<Instant>,
}

impl Action {
    fn info(&self, now: Instant) -> ActionInfo {
        ActionInfo {
            name: self.name.clone(),
            caption: self.caption.clone(),
            call_delay: u64::try_from(self.call_delay.as_millis()).unwrap_or(u64::MAX),
            last_call: self.last_call.map(|at| {
                u64::try_from(now.duration_since(at).as_millis()).unwrap_or(u64::MAX)
            }),
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        !self.call_delay.is_zero()
            && now.duration_since(self.last_call.unwrap_or(self.scheduled_since)) >= self.call_delay
    }
}

/// Registry of the device's actions.
///
/// # Examples
///
/// ```
/// use smartthing::{ActionInvoker, ActionRegistry};
///
/// let actions = ActionRegistry::new();
/// actions.add("led_on", "Turn led on", || Ok(())).unwrap();
///
/// assert!(actions.call_action("led_on").is_ok());
/// assert!(actions.call_action("led_off").is_err());
/// ```
#[derive(Default)]
pub struct ActionRegistry {
    actions: RwLock<Vec<Action>>,
    settings: Option<Arc<Settings>>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.actions.read().iter().map(|a| a.name.clone()).collect();
        f.debug_struct("ActionRegistry")
            .field("actions", &names)
            .finish_non_exhaustive()
    }
}

impl ActionRegistry {
    /// Creates an empty registry without persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists call delays to the `ActionSchedule` partition of `settings`.
    #[must_use]
    pub fn with_settings(mut self, settings: Arc<Settings>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Registers an action.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::AlreadyExists`] if the name is taken.
    pub fn add(
        &self,
        name: impl Into<String>,
        caption: impl Into<String>,
        handler: impl Fn() -> std::result::Result<(), String> + Send + Sync + 'static,
    ) -> std::result::Result<(), ActionError> {
        let name = name.into();
        let mut actions = self.actions.write();
        if actions.iter().any(|a| a.name == name) {
            return Err(ActionError::AlreadyExists(name));
        }
        tracing::debug!(action = %name, "Registering action");
        actions.push(Action {
            name,
            caption: caption.into(),
            handler: Arc::new(handler),
            call_delay: Duration::ZERO,
            scheduled_since: Instant::now(),
            last_call: None,
        });
        Ok(())
    }

    /// Returns the number of registered actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.read().len()
    }

    /// Returns `true` if no action is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.read().is_empty()
    }

    /// Serializes every action as `{name, caption, callDelay, lastCall}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.actions_info()).unwrap_or(Value::Null)
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Sets how often an action is called by the scheduler; zero disables.
    ///
    /// The schedule is persisted when the registry has settings.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::NotFound`] for unknown actions, or a storage
    /// error if persisting fails.
    pub fn set_call_delay(&self, name: &str, delay: Duration) -> Result<()> {
        {
            let mut actions = self.actions.write();
            let action = actions
                .iter_mut()
                .find(|a| a.name == name)
                .ok_or_else(|| ActionError::NotFound(name.to_string()))?;
            action.call_delay = delay;
            action.scheduled_since = Instant::now();
        }
        tracing::info!(action = %name, delay_ms = delay.as_millis(), "Action schedule updated");
        self.save_schedule()
    }

    fn save_schedule(&self) -> Result<()> {
        let Some(settings) = &self.settings else {
            return Ok(());
        };
        let schedule: BTreeMap<String, u64> = self
            .actions_info()
            .into_iter()
            .filter(|info| info.call_delay > 0)
            .map(|info| (info.name, info.call_delay))
            .collect();
        settings.set_action_schedule(&schedule)
    }

    /// Applies the persisted schedule to the registered actions.
    ///
    /// Returns the number of scheduled actions. Entries for unknown actions
    /// are ignored.
    pub fn load_schedule(&self) -> usize {
        let Some(settings) = &self.settings else {
            return 0;
        };
        let now = Instant::now();
        let mut actions = self.actions.write();
        let mut loaded = 0;
        for (name, delay) in settings.action_schedule() {
            match actions.iter_mut().find(|a| a.name == name) {
                Some(action) => {
                    action.call_delay = Duration::from_millis(delay);
                    action.scheduled_since = now;
                    loaded += 1;
                }
                None => tracing::warn!(action = %name, "Scheduled action is not registered"),
            }
        }
        tracing::debug!(count = loaded, "Action schedule loaded");
        loaded
    }

    /// Calls every action whose delay has elapsed since its last call.
    ///
    /// Returns the number of actions called.
    pub fn run_scheduled(&self) -> usize {
        let now = Instant::now();
        let due: Vec<String> = self
            .actions
            .read()
            .iter()
            .filter(|a| a.is_due(now))
            .map(|a| a.name.clone())
            .collect();

        for name in &due {
            tracing::debug!(action = %name, "Calling scheduled action");
            if let Err(e) = self.call_action(name) {
                tracing::warn!(action = %name, error = %e, "Scheduled action failed");
            }
        }
        due.len()
    }
}

impl ActionInvoker for ActionRegistry {
    fn call_action(&self, name: &str) -> std::result::Result<(), ActionError> {
        // Run the handler without holding the lock.
        let handler = {
            let mut actions = self.actions.write();
            let action = actions
                .iter_mut()
                .find(|a| a.name == name)
                .ok_or_else(|| ActionError::NotFound(name.to_string()))?;
            action.last_call = Some(Instant::now());
            Arc::clone(&action.handler)
        };

        handler().map_err(|message| ActionError::Failed {
            name: name.to_string(),
            message,
        })
    }

    fn actions_info(&self) -> Vec<ActionInfo> {
        let now = Instant::now();
        self.actions.read().iter().map(|a| a.info(now)).collect()
    }
}
