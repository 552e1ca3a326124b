//! Fan-out of engine events to notification channels.
//!
//! Each enabled channel is attempted in its own task with its own timeout,
//! so a hung or failing channel never delays or fails the others. Outcomes
//! are recorded one by one in the event log. Failed deliveries are not
//! retried.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use vaultline_core::{
    ChannelSummary, LogCategory, NewLogEntry, NotificationChannel, NotificationEvent, ValidationError,
};
use vaultline_eventlog::EventLog;

use crate::error::NotifierError;
use crate::message::NotificationMessage;
use crate::policy::NotificationPolicy;
use crate::registry::NotifierRegistry;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    DeliveryFailed(String),
    ChannelDisabled,
}

/// One channel's outcome for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDelivery {
    pub channel_id: String,
    pub channel_name: String,
    pub outcome: DeliveryOutcome,
}

/// Dispatcher settings.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Upper bound on a single channel's delivery attempt.
    pub send_timeout: Duration,
    pub policy: NotificationPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(15),
            policy: NotificationPolicy::default(),
        }
    }
}

pub struct Dispatcher {
    config: DispatcherConfig,
    registry: Arc<NotifierRegistry>,
    channels: RwLock<Vec<Arc<NotificationChannel>>>,
    event_log: Arc<dyn EventLog>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, registry: Arc<NotifierRegistry>, event_log: Arc<dyn EventLog>) -> Self {
        Self {
            config,
            registry,
            channels: RwLock::new(Vec::new()),
            event_log,
        }
    }

    pub fn policy(&self) -> NotificationPolicy {
        self.config.policy
    }

    /// Add or replace a channel after validating it.
    pub fn upsert_channel(&self, channel: NotificationChannel) -> Result<(), Vec<ValidationError>> {
        let errors = channel.validate();
        if !errors.is_empty() {
            return Err(errors);
        }
        let mut channels = self.channels.write();
        let channel = Arc::new(channel);
        match channels.iter_mut().find(|c| c.id == channel.id) {
            Some(slot) => *slot = channel,
            None => channels.push(channel),
        }
        Ok(())
    }

    pub fn remove_channel(&self, id: &str) -> bool {
        let mut channels = self.channels.write();
        let before = channels.len();
        channels.retain(|c| c.id != id);
        channels.len() != before
    }

    pub fn list_channels(&self) -> Vec<ChannelSummary> {
        self.channels.read().iter().map(|c| c.summary()).collect()
    }

    /// Dispatch `event` to every configured channel.
    pub async fn notify(&self, event: &NotificationEvent) -> Vec<ChannelDelivery> {
        let channels = self.channels.read().clone();
        self.dispatch(event, &channels).await
    }

    /// Attempt delivery of `event` to each of `channels` independently.
    ///
    /// Returns nothing when the policy does not cover the event's kind.
    #[instrument(skip_all, fields(kind = %event.kind))]
    pub async fn dispatch(
        &self,
        event: &NotificationEvent,
        channels: &[Arc<NotificationChannel>],
    ) -> Vec<ChannelDelivery> {
        if !self.config.policy.allows(event.kind) {
            debug!("notification policy skips this event");
            return Vec::new();
        }
        let message = Arc::new(NotificationMessage::from_event(event));

        let attempts = channels.iter().map(|channel| {
            let channel = Arc::clone(channel);
            let message = Arc::clone(&message);
            let notifier = self.registry.get(channel.kind());
            let timeout = self.config.send_timeout;
            async move {
                let outcome = if channel.enabled {
                    match notifier {
                        Some(notifier) => {
                            let ch = Arc::clone(&channel);
                            let task = tokio::spawn(async move {
                                tokio::time::timeout(timeout, notifier.send(&ch, &message)).await
                            });
                            match task.await {
                                Ok(Ok(Ok(_receipt))) => DeliveryOutcome::Delivered,
                                Ok(Ok(Err(e))) => DeliveryOutcome::DeliveryFailed(e.to_string()),
                                Ok(Err(_elapsed)) => {
                                    DeliveryOutcome::DeliveryFailed(NotifierError::Timeout(timeout).to_string())
                                }
                                Err(join) => DeliveryOutcome::DeliveryFailed(format!("notifier task failed: {join}")),
                            }
                        }
                        None => DeliveryOutcome::DeliveryFailed(NotifierError::NoNotifier(channel.kind()).to_string()),
                    }
                } else {
                    DeliveryOutcome::ChannelDisabled
                };
                ChannelDelivery {
                    channel_id: channel.id.clone(),
                    channel_name: channel.name.clone(),
                    outcome,
                }
            }
        });
        let deliveries = join_all(attempts).await;

        for delivery in &deliveries {
            self.record(event, delivery).await;
        }
        deliveries
    }

    /// Send a test message to one channel and record the result.
    pub async fn test_channel(&self, id: &str) -> Result<ChannelDelivery, NotifierError> {
        let channel = self
            .channels
            .read()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| NotifierError::ChannelNotFound(id.to_owned()))?;
        let notifier = self
            .registry
            .get(channel.kind())
            .ok_or(NotifierError::NoNotifier(channel.kind()))?;

        let timeout = self.config.send_timeout;
        let result = tokio::time::timeout(timeout, async {
            notifier.health_check(&channel).await?;
            notifier.send(&channel, &NotificationMessage::test()).await
        })
        .await
        .unwrap_or(Err(NotifierError::Timeout(timeout)));

        let outcome = match result {
            Ok(_) => DeliveryOutcome::Delivered,
            Err(e) => DeliveryOutcome::DeliveryFailed(e.to_string()),
        };
        let delivery = ChannelDelivery {
            channel_id: channel.id.clone(),
            channel_name: channel.name.clone(),
            outcome,
        };

        let entry = match &delivery.outcome {
            DeliveryOutcome::Delivered => NewLogEntry::success(
                LogCategory::Notification,
                format!("channel test succeeded: {}", channel.name),
            ),
            DeliveryOutcome::DeliveryFailed(reason) => NewLogEntry::warning(
                LogCategory::Notification,
                format!("channel test failed: {}", channel.name),
            )
            .with_details(reason.clone()),
            DeliveryOutcome::ChannelDisabled => NewLogEntry::info(
                LogCategory::Notification,
                format!("channel disabled: {}", channel.name),
            ),
        };
        self.append(entry).await;
        Ok(delivery)
    }

    async fn record(&self, event: &NotificationEvent, delivery: &ChannelDelivery) {
        let mut entry = match &delivery.outcome {
            DeliveryOutcome::Delivered => NewLogEntry::info(
                LogCategory::Notification,
                format!("{} notification delivered via {}", event.kind, delivery.channel_name),
            ),
            DeliveryOutcome::DeliveryFailed(reason) => NewLogEntry::warning(
                LogCategory::Notification,
                format!("{} notification failed via {}", event.kind, delivery.channel_name),
            )
            .with_details(reason.clone()),
            DeliveryOutcome::ChannelDisabled => NewLogEntry::info(
                LogCategory::Notification,
                format!("{} notification skipped, channel {} is disabled", event.kind, delivery.channel_name),
            ),
        };
        if let (Some(job_id), Some(rule)) = (&event.job_id, &event.rule_name) {
            entry = entry.with_job(job_id.clone(), rule.clone());
        }
        self.append(entry).await;
    }

    async fn append(&self, entry: NewLogEntry) {
        if let Err(e) = self.event_log.append(entry).await {
            warn!(error = %e, "failed to record notification outcome");
        }
    }
}
