// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tuning knobs for the rule runtime.

use std::time::Duration;

/// Configuration of the check loop, the action scheduler and the outbound
/// request worker.
///
/// # Examples
///
/// ```
/// use smartthing::DispatchConfig;
/// use std::time::Duration;
///
/// let config = DispatchConfig::new()
///     .with_check_interval(Duration::from_millis(250))
///     .with_http_timeout(Duration::from_secs(5))
///     .with_max_concurrent_requests(2);
///
/// assert_eq!(config.queue_capacity(), DispatchConfig::DEFAULT_QUEUE_CAPACITY);
/// ```
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    check_interval: Duration,
    schedule_interval: Duration,
    http_timeout: Duration,
    queue_capacity: usize,
    max_concurrent_requests: usize,
}

impl DispatchConfig {
    /// Default interval between two polls of every watcher.
    pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(500);
    /// Default interval between two runs of the action scheduler.
    pub const DEFAULT_SCHEDULE_INTERVAL: Duration = Duration::from_secs(1);
    /// Default timeout of outbound requests.
    pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(2);
    /// Default number of requests that can wait in the queue.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 16;
    /// Default number of requests executed at the same time.
    pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;

    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            check_interval: Self::DEFAULT_CHECK_INTERVAL,
            schedule_interval: Self::DEFAULT_SCHEDULE_INTERVAL,
            http_timeout: Self::DEFAULT_HTTP_TIMEOUT,
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            max_concurrent_requests: Self::DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }

    /// Sets the check loop interval.
    #[must_use]
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Sets the action scheduler interval.
    #[must_use]
    pub fn with_schedule_interval(mut self, interval: Duration) -> Self {
        self.schedule_interval = interval;
        self
    }

    /// Sets the outbound request timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Sets the outbound queue capacity (at least 1).
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Sets the number of concurrent outbound requests (at least 1).
    #[must_use]
    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max.max(1);
        self
    }

    /// Returns the check loop interval.
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Returns the action scheduler interval.
    #[must_use]
    pub fn schedule_interval(&self) -> Duration {
        self.schedule_interval
    }

    /// Returns the outbound request timeout.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    /// Returns the outbound queue capacity.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Returns the number of concurrent outbound requests.
    #[must_use]
    pub fn max_concurrent_requests(&self) -> usize {
        self.max_concurrent_requests
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.http_timeout(), Duration::from_secs(2));
        assert_eq!(config.check_interval(), DispatchConfig::DEFAULT_CHECK_INTERVAL);
    }

    #[test]
    fn limits_are_at_least_one() {
        let config = DispatchConfig::new()
            .with_queue_capacity(0)
            .with_max_concurrent_requests(0);
        assert_eq!(config.queue_capacity(), 1);
        assert_eq!(config.max_concurrent_requests(), 1);
    }
}
