use tracing::info;
use vaultline_core::{ChannelKind, NotificationChannel};

use crate::error::NotifierError;
use crate::message::NotificationMessage;
use crate::notifier::{DeliveryReceipt, Notifier};

/// A notifier that logs the message and reports success without performing
/// any external I/O.
///
/// Useful for local development and tests where no real SMTP server or chat
/// API is available.
pub struct LogNotifier {
    name: String,
    kind: ChannelKind,
}

impl LogNotifier {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            name: format!("log-{kind}"),
            kind,
        }
    }
}

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(
        &self,
        channel: &NotificationChannel,
        message: &NotificationMessage,
    ) -> Result<DeliveryReceipt, NotifierError> {
        info!(
            notifier = %self.name,
            channel = %channel.name,
            targets = ?channel.config.targets(),
            subject = %message.subject,
            "log notifier delivered message"
        );
        Ok(DeliveryReceipt { message_id: None })
    }

    #[allow(clippy::unused_async)]
    async fn health_check(&self, channel: &NotificationChannel) -> Result<(), NotifierError> {
        let errors = channel.validate();
        if let Some(first) = errors.first() {
            return Err(NotifierError::Configuration(first.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use vaultline_core::ChannelConfig;

    use super::*;

    fn channel(token: &str) -> NotificationChannel {
        NotificationChannel::new(
            "tg",
            "ops",
            ChannelConfig::Telegram {
                bot_token: SecretString::new(token.into()),
                chat_id: "7".into(),
            },
        )
    }

    #[test]
    fn log_notifier_name() {
        let notifier = LogNotifier::new(ChannelKind::Email);
        assert_eq!(Notifier::name(&notifier), "log-email");
    }

    #[tokio::test]
    async fn log_notifier_send_succeeds() {
        let notifier = LogNotifier::new(ChannelKind::Telegram);
        let receipt = Notifier::send(&notifier, &channel("t"), &NotificationMessage::test())
            .await
            .unwrap();
        assert!(receipt.message_id.is_none());
    }

    #[tokio::test]
    async fn health_check_validates_channel() {
        let notifier = LogNotifier::new(ChannelKind::Telegram);
        Notifier::health_check(&notifier, &channel("t")).await.unwrap();
        let err = Notifier::health_check(&notifier, &channel("")).await.unwrap_err();
        assert!(matches!(err, NotifierError::Configuration(_)));
    }
}
