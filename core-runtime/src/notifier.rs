//! # Outbound Notifications
//!
//! Fire-and-forget dispatch of catalog events (new items, changed fields) to
//! external HTTP endpoints.
//!
//! ## Overview
//!
//! Sync tasks call the [`Notifier`] trait synchronously and never wait on the
//! network. [`HttpNotifier`] pushes each notification into a bounded queue
//! drained by a single background dispatcher task.
//!
//! ## Overflow Policy
//!
//! When the queue is full the *newest* notification is dropped. Every drop is
//! logged at `warn` and counted in [`HttpNotifier::dropped_count`]. Delivery
//! failures (network errors, non-2xx responses) are logged and dropped as
//! well; there is no redelivery.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐ try_send  ┌──────────────┐  recv   ┌────────────┐  POST  ┌──────────┐
//! │ sync tasks ├──────────>│ bounded mpsc ├────────>│ dispatcher ├───────>│ endpoint │
//! └────────────┘  (drop    └──────────────┘         └────────────┘        └──────────┘
//!                on full)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::notifier::{HttpNotifier, Notifier};
//!
//! let (notifier, dispatcher) = HttpNotifier::spawn(config.notifier.clone(), http_client, cancel.clone());
//! notifier.notify_new_item("anilist:30013", "One Piece");
//! ```

use crate::config::NotifierConfig;
use crate::logging::redact_url;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fire-and-forget notification sink
///
/// Implementations must not block and must not surface delivery errors to the
/// caller.
pub trait Notifier: Send + Sync {
    /// A catalog item was stored for the first time
    fn notify_new_item(&self, id: &str, title: &str);

    /// A tracked field of a stored item changed
    fn notify_field_change(&self, id: &str, title: &str, old_value: &str, new_value: &str);
}

/// Notifier used when no endpoint is configured
#[derive(Debug, Default, Clone)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify_new_item(&self, id: &str, _title: &str) {
        debug!(id, "Notification skipped: notifier disabled");
    }

    fn notify_field_change(&self, id: &str, _title: &str, _old_value: &str, _new_value: &str) {
        debug!(id, "Notification skipped: notifier disabled");
    }
}

/// Wire payload posted to the notification endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    NewItem {
        id: String,
        title: String,
    },
    FieldChange {
        id: String,
        title: String,
        old_value: String,
        new_value: String,
    },
}

impl Notification {
    fn kind(&self) -> &'static str {
        match self {
            Notification::NewItem { .. } => "new_item",
            Notification::FieldChange { .. } => "field_change",
        }
    }

    fn id(&self) -> &str {
        match self {
            Notification::NewItem { id, .. } | Notification::FieldChange { id, .. } => id,
        }
    }
}

/// Receiving half of the notification queue
pub struct NotificationQueue {
    receiver: mpsc::Receiver<Notification>,
}

/// HTTP notifier backed by a bounded, drop-on-overflow queue
pub struct HttpNotifier {
    sender: mpsc::Sender<Notification>,
    dropped: Arc<AtomicU64>,
}

impl HttpNotifier {
    /// Create the notifier and its queue without starting a dispatcher
    pub fn new(queue_capacity: usize) -> (Self, NotificationQueue) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        (
            Self {
                sender,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            NotificationQueue { receiver },
        )
    }

    /// Create the notifier and spawn its dispatcher on the current runtime
    pub fn spawn(
        config: NotifierConfig,
        http_client: Arc<dyn HttpClient>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (notifier, queue) = Self::new(config.queue_capacity);
        let dispatcher = NotificationDispatcher {
            config,
            http_client,
        };
        let handle = tokio::spawn(dispatcher.run(queue, cancel));
        (notifier, handle)
    }

    /// Notifications discarded because the queue was full or closed
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn enqueue(&self, notification: Notification) {
        match self.sender.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(notification)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    kind = notification.kind(),
                    id = notification.id(),
                    dropped_total = dropped,
                    "Notification queue full, dropping notification"
                );
            }
            Err(TrySendError::Closed(notification)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    kind = notification.kind(),
                    id = notification.id(),
                    dropped_total = dropped,
                    "Notification dispatcher stopped, dropping notification"
                );
            }
        }
    }
}

impl Notifier for HttpNotifier {
    fn notify_new_item(&self, id: &str, title: &str) {
        self.enqueue(Notification::NewItem {
            id: id.to_string(),
            title: title.to_string(),
        });
    }

    fn notify_field_change(&self, id: &str, title: &str, old_value: &str, new_value: &str) {
        self.enqueue(Notification::FieldChange {
            id: id.to_string(),
            title: title.to_string(),
            old_value: old_value.to_string(),
            new_value: new_value.to_string(),
        });
    }
}

/// Background task that posts queued notifications
pub struct NotificationDispatcher {
    config: NotifierConfig,
    http_client: Arc<dyn HttpClient>,
}

impl NotificationDispatcher {
    pub fn new(config: NotifierConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            config,
            http_client,
        }
    }

    /// Drain the queue until every sender is gone or `cancel` fires
    pub async fn run(self, mut queue: NotificationQueue, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = queue.receiver.recv() => next,
            };

            let Some(notification) = next else {
                break;
            };
            self.deliver(&notification).await;
        }

        queue.receiver.close();
        let mut abandoned = 0usize;
        while queue.receiver.try_recv().is_ok() {
            abandoned += 1;
        }
        if abandoned > 0 {
            warn!(abandoned, "Notification dispatcher stopped with pending notifications");
        }
        info!("Notification dispatcher stopped");
    }

    async fn deliver(&self, notification: &Notification) {
        let endpoint = match notification {
            Notification::NewItem { .. } => self.config.new_item_url.as_deref(),
            Notification::FieldChange { .. } => self.config.field_change_url.as_deref(),
        };
        let Some(url) = endpoint else {
            debug!(kind = notification.kind(), "No endpoint configured for notification kind");
            return;
        };

        let request = match HttpRequest::new(HttpMethod::Post, url)
            .timeout(self.config.request_timeout)
            .json(notification)
        {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, kind = notification.kind(), "Failed to encode notification");
                return;
            }
        };

        match self.http_client.execute(request).await {
            Ok(response) if response.is_success() => {
                debug!(
                    kind = notification.kind(),
                    id = notification.id(),
                    status = response.status,
                    "Notification delivered"
                );
            }
            Ok(response) => {
                warn!(
                    kind = notification.kind(),
                    id = notification.id(),
                    status = response.status,
                    endpoint = %redact_url(url),
                    "Notification rejected by endpoint, dropping"
                );
            }
            Err(e) => {
                warn!(
                    kind = notification.kind(),
                    id = notification.id(),
                    error = %e,
                    endpoint = %redact_url(url),
                    "Notification delivery failed, dropping"
                );
            }
        }
    }
}
