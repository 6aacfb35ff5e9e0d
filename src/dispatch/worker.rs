// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Outbound request queue and worker.
//!
//! Polling never performs network I/O itself. HTTP and notification
//! callbacks push an [`OutboundJob`] onto a bounded queue with
//! [`OutboundQueue::submit`], which never waits; the [`OutboundWorker`] task
//! drains the queue and executes up to a configured number of requests at
//! once.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

use super::DispatchConfig;
use crate::callback::HttpMethod;

// ============================================================================
// RequestTracker
// ============================================================================

#[derive(Debug, Default)]
struct RequestState {
    in_flight: bool,
    last_status: Option<u16>,
}

/// In-flight flag and last status of one callback's requests.
///
/// Clones share the same state, so the worker can report completion to the
/// callback that queued the request.
#[derive(Debug, Clone, Default)]
pub struct RequestTracker {
    state: Arc<Mutex<RequestState>>,
}

impl RequestTracker {
    /// Marks a request as started. Returns `false` if one is already running.
    #[must_use]
    pub fn try_begin(&self) -> bool {
        let mut state = self.state.lock();
        if state.in_flight {
            false
        } else {
            state.in_flight = true;
            true
        }
    }

    /// Marks the running request as finished.
    ///
    /// `status` is `None` when no response was received.
    pub fn finish(&self, status: Option<u16>) {
        let mut state = self.state.lock();
        state.in_flight = false;
        state.last_status = status;
    }

    /// Clears the in-flight flag without recording a status.
    pub fn abort(&self) {
        self.state.lock().in_flight = false;
    }

    /// Returns `true` while a request is running.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.state.lock().in_flight
    }

    /// Returns the status of the last completed request.
    #[must_use]
    pub fn last_status(&self) -> Option<u16> {
        self.state.lock().last_status
    }
}

// ============================================================================
// OutboundQueue
// ============================================================================

/// A request waiting to be sent.
#[derive(Debug)]
pub struct OutboundJob {
    /// HTTP method.
    pub method: HttpMethod,
    /// Absolute url.
    pub url: String,
    /// JSON body, sent with `Content-Type: application/json`.
    pub body: Option<String>,
    /// Tracker of the callback that queued the request.
    pub tracker: RequestTracker,
}

/// Sending half of the outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<OutboundJob>,
}

impl OutboundQueue {
    /// Creates a queue holding up to `capacity` pending jobs.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queues a job without waiting.
    ///
    /// When the queue is full or closed the job is dropped, its tracker is
    /// released and `false` is returned.
    pub fn submit(&self, job: OutboundJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(url = %job.url, "Outbound queue full, dropping request");
                job.tracker.abort();
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(url = %job.url, "Outbound worker stopped, dropping request");
                job.tracker.abort();
                false
            }
        }
    }
}

// ============================================================================
// OutboundWorker
// ============================================================================

/// Executes queued requests.
#[derive(Debug)]
pub struct OutboundWorker {
    #[cfg(feature = "http")]
    client: reqwest::Client,
    permits: Arc<Semaphore>,
}

impl OutboundWorker {
    /// Creates a worker using the timeout and concurrency of `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &DispatchConfig) -> crate::Result<Self> {
        Ok(Self {
            #[cfg(feature = "http")]
            client: reqwest::Client::builder()
                .timeout(config.http_timeout())
                .build()?,
            permits: Arc::new(Semaphore::new(config.max_concurrent_requests())),
        })
    }

    /// Spawns the worker loop. It ends when every [`OutboundQueue`] clone
    /// is dropped.
    pub fn spawn(self, mut rx: mpsc::Receiver<OutboundJob>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                    job.tracker.abort();
                    break;
                };
                #[cfg(feature = "http")]
                let client = self.client.clone();
                tokio::spawn(async move {
                    #[cfg(feature = "http")]
                    execute(&client, job).await;
                    #[cfg(not(feature = "http"))]
                    {
                        tracing::warn!(url = %job.url, "HTTP support disabled, dropping request");
                        job.tracker.abort();
                    }
                    drop(permit);
                });
            }
            tracing::debug!("Outbound worker stopped");
        })
    }
}

#[cfg(feature = "http")]
async fn execute(client: &reqwest::Client, job: OutboundJob) {
    let OutboundJob {
        method,
        url,
        body,
        tracker,
    } = job;

    let mut request = client.request(method.into(), &url);
    if let Some(body) = body {
        request = request
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
    }

    match request.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            tracing::info!(%method, url = %url, status, "Callback request finished");
            tracker.finish(Some(status));
        }
        Err(e) => {
            tracing::warn!(%method, url = %url, error = %e, "Callback request failed");
            tracker.finish(e.status().map(|s| s.as_u16()));
        }
    }
}
