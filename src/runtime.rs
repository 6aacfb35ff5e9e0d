// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background tasks driving the rule engine.
//!
//! [`Runtime::start`] restores the persisted rules and action schedule, then
//! spawns three tasks: the outbound request worker, the check loop polling
//! every watcher and the action scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::actions::ActionRegistry;
use crate::dispatch::{
    DeviceIdentity, DispatchConfig, DispatchContext, LoadReport, OutboundQueue, OutboundWorker,
    RuleEngine, SharedRuleEngine,
};
use crate::error::Result;
use crate::observable::ObservableRegistry;
use crate::rest::RulesApi;
use crate::settings::Settings;

/// Handle to the running background tasks.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use smartthing::{ActionRegistry, DeviceIdentity, DispatchConfig, ObservableRegistry, Runtime, Settings};
/// use smartthing::store::FileStorage;
///
/// # async fn example() -> smartthing::Result<()> {
/// let settings = Arc::new(Settings::with_storage(FileStorage::new("/var/lib/smartthing/eeprom.bin")));
/// let registry = Arc::new(ObservableRegistry::new());
/// registry.register_sensor("temperature", || 21)?;
/// let actions = Arc::new(ActionRegistry::new().with_settings(Arc::clone(&settings)));
///
/// let runtime = Runtime::start(
///     settings,
///     registry,
///     actions,
///     DispatchConfig::default(),
///     DeviceIdentity::new("thermometer", "192.168.1.20"),
/// )?;
///
/// let rules = runtime.api().list(None, None);
/// println!("{}", rules.body);
///
/// runtime.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Runtime {
    engine: SharedRuleEngine,
    actions: Arc<ActionRegistry>,
    load_report: LoadReport,
    shutdown_tx: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
    worker: JoinHandle<()>,
}

impl Runtime {
    /// Restores persisted state and spawns the background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn start(
        settings: Arc<Settings>,
        registry: Arc<ObservableRegistry>,
        actions: Arc<ActionRegistry>,
        config: DispatchConfig,
        identity: DeviceIdentity,
    ) -> Result<Self> {
        let (outbound, rx) = OutboundQueue::channel(config.queue_capacity());
        let worker = OutboundWorker::new(&config)?.spawn(rx);

        settings.load_config();
        let context = DispatchContext::new(actions.clone(), outbound, settings)
            .with_identity(identity);
        let mut engine = RuleEngine::new(registry, context);
        let load_report = engine.load();
        actions.load_schedule();
        let engine = engine.into_shared();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loops = vec![
            tokio::spawn(check_loop(
                Arc::clone(&engine),
                config.check_interval(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(schedule_loop(
                Arc::clone(&actions),
                config.schedule_interval(),
                shutdown_rx,
            )),
        ];

        tracing::info!(
            callbacks = load_report.loaded,
            check_interval_ms = config.check_interval().as_millis(),
            "Rule runtime started"
        );
        Ok(Self {
            engine,
            actions,
            load_report,
            shutdown_tx,
            loops,
            worker,
        })
    }

    /// Returns the shared rule engine.
    #[must_use]
    pub fn engine(&self) -> &SharedRuleEngine {
        &self.engine
    }

    /// Returns the action registry.
    #[must_use]
    pub fn actions(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    /// Returns what was restored from the `Rules` partition at startup.
    #[must_use]
    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    /// Returns REST handlers bound to this runtime.
    #[must_use]
    pub fn api(&self) -> RulesApi {
        RulesApi::new(Arc::clone(&self.engine), self.actions.clone())
    }

    /// Stops the loops and the outbound worker.
    ///
    /// Requests already being sent run until they complete or time out.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.loops {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background loop panicked");
            }
        }
        self.worker.abort();
        tracing::info!("Rule runtime stopped");
    }
}

async fn check_loop(
    engine: SharedRuleEngine,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => engine.lock().check(),
        }
    }
    tracing::debug!("Check loop stopped");
}

async fn schedule_loop(
    actions: Arc<ActionRegistry>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                let called = actions.run_scheduled();
                if called > 0 {
                    tracing::trace!(called, "Scheduled actions called");
                }
            }
        }
    }
    tracing::debug!("Action scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI16, AtomicUsize, Ordering};

    use serde_json::json;

    use crate::store::MemoryStorage;

    fn counting_actions(settings: &Arc<Settings>) -> (Arc<ActionRegistry>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let actions = ActionRegistry::new().with_settings(Arc::clone(settings));
        actions
            .add("alarm", "Alarm", move || {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        (Arc::new(actions), count)
    }

    #[tokio::test(start_paused = true)]
    async fn check_loop_fires_restored_rules() {
        let settings = Arc::new(Settings::with_storage(MemoryStorage::default()));
        settings
            .set_rules(
                &json!([{
                    "observable": {"type": "sensor", "name": "smoke"},
                    "callbacks": [{"id": 1, "type": "action", "action": "alarm",
                                   "triggerDisabled": false, "trigger": 1}],
                }])
                .to_string(),
            )
            .unwrap();

        let smoke = Arc::new(AtomicI16::new(0));
        let source = Arc::clone(&smoke);
        let registry = Arc::new(ObservableRegistry::new());
        registry
            .register_sensor("smoke", move || source.load(Ordering::SeqCst))
            .unwrap();
        let (actions, count) = counting_actions(&settings);

        let runtime = Runtime::start(
            settings,
            registry,
            actions,
            DispatchConfig::default(),
            DeviceIdentity::default(),
        )
        .unwrap();
        assert_eq!(runtime.load_report().loaded, 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        smoke.store(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_calls_persisted_actions() {
        let settings = Arc::new(Settings::with_storage(MemoryStorage::default()));
        let (actions, count) = counting_actions(&settings);
        actions
            .set_call_delay("alarm", Duration::from_secs(5))
            .unwrap();

        let (restarted, restarted_count) = counting_actions(&settings);
        let runtime = Runtime::start(
            settings,
            Arc::new(ObservableRegistry::new()),
            restarted,
            DispatchConfig::default(),
            DeviceIdentity::default(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(11_500)).await;
        assert_eq!(restarted_count.load(Ordering::SeqCst), 2);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        runtime.shutdown().await;
    }
}
