// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rule dispatch: the [`RuleEngine`], its collaborators and the outbound
//! request worker.

mod config;
mod engine;
mod worker;

use std::fmt;
use std::sync::Arc;

pub use config::DispatchConfig;
pub use engine::{LoadReport, RuleEngine, RulesSnapshot, SharedRuleEngine};
pub use worker::{OutboundJob, OutboundQueue, OutboundWorker, RequestTracker};

use crate::actions::{ActionInvoker, NoActions};
use crate::settings::Settings;
use crate::store::MemoryStorage;

/// Device description sent along with notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Device type, e.g. `lamp`.
    pub device_type: String,
    /// Address of the device on the local network.
    pub ip: String,
}

impl DeviceIdentity {
    /// Creates an identity.
    #[must_use]
    pub fn new(device_type: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            device_type: device_type.into(),
            ip: ip.into(),
        }
    }
}

/// Everything a callback needs to perform its effect.
#[derive(Clone)]
pub struct DispatchContext {
    actions: Arc<dyn ActionInvoker>,
    outbound: OutboundQueue,
    settings: Arc<Settings>,
    identity: DeviceIdentity,
}

impl DispatchContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        actions: Arc<dyn ActionInvoker>,
        outbound: OutboundQueue,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            actions,
            outbound,
            settings,
            identity: DeviceIdentity::default(),
        }
    }

    /// Sets the device identity reported in notifications.
    #[must_use]
    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Creates a context without actions, with in-memory settings and an
    /// outbound queue nobody drains.
    ///
    /// Network callbacks are dropped; lambda callbacks work normally.
    #[must_use]
    pub fn detached() -> Self {
        let (outbound, _) = OutboundQueue::channel(1);
        Self::new(
            Arc::new(NoActions),
            outbound,
            Arc::new(Settings::with_storage(MemoryStorage::default())),
        )
    }

    /// Returns the action invoker.
    #[must_use]
    pub fn actions(&self) -> &Arc<dyn ActionInvoker> {
        &self.actions
    }

    /// Returns the outbound queue.
    #[must_use]
    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    /// Returns the settings.
    #[must_use]
    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Returns the device identity.
    #[must_use]
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
