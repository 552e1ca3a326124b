use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vaultline_core::{ChannelKind, NotificationChannel};

use crate::error::NotifierError;
use crate::message::NotificationMessage;

/// What a notifier reports after a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Remote message id, when the service returns one.
    pub message_id: Option<String>,
}

/// Strongly-typed notifier trait with native `async fn`.
///
/// This trait is **not** object-safe. Every `Notifier` automatically
/// implements [`DynNotifier`] for use behind `Arc<dyn DynNotifier>`.
pub trait Notifier: Send + Sync {
    /// Returns the name of this notifier, used in logs.
    fn name(&self) -> &str;

    /// The channel kind this notifier delivers to.
    fn kind(&self) -> ChannelKind;

    /// Deliver `message` to `channel`.
    ///
    /// Transient network trouble is reported as an error, never a panic.
    fn send(
        &self,
        channel: &NotificationChannel,
        message: &NotificationMessage,
    ) -> impl std::future::Future<Output = Result<DeliveryReceipt, NotifierError>> + Send;

    /// Verify that `channel` is reachable with its configured credentials.
    fn health_check(
        &self,
        channel: &NotificationChannel,
    ) -> impl std::future::Future<Output = Result<(), NotifierError>> + Send;
}

/// Object-safe notifier trait.
///
/// Implement [`Notifier`] and rely on the blanket implementation instead of
/// implementing this directly.
#[async_trait]
pub trait DynNotifier: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ChannelKind;

    async fn send(
        &self,
        channel: &NotificationChannel,
        message: &NotificationMessage,
    ) -> Result<DeliveryReceipt, NotifierError>;

    async fn health_check(&self, channel: &NotificationChannel) -> Result<(), NotifierError>;
}

#[async_trait]
impl<T: Notifier + Sync> DynNotifier for T {
    fn name(&self) -> &str {
        Notifier::name(self)
    }

    fn kind(&self) -> ChannelKind {
        Notifier::kind(self)
    }

    async fn send(
        &self,
        channel: &NotificationChannel,
        message: &NotificationMessage,
    ) -> Result<DeliveryReceipt, NotifierError> {
        Notifier::send(self, channel, message).await
    }

    async fn health_check(&self, channel: &NotificationChannel) -> Result<(), NotifierError> {
        Notifier::health_check(self, channel).await
    }
}
