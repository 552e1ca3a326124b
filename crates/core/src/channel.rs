use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, require};

/// The delivery mechanism behind a notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Whatsapp,
    Telegram,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Whatsapp => "whatsapp",
            Self::Telegram => "telegram",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific channel settings. Credentials never appear in `Debug` output.
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChannelConfig {
    Email {
        smtp_host: String,
        #[serde(default = "default_smtp_port")]
        smtp_port: u16,
        username: String,
        password: SecretString,
        recipients: Vec<String>,
    },
    Whatsapp {
        api_key: SecretString,
        phone_number: String,
        instance_id: String,
    },
    Telegram {
        bot_token: SecretString,
        chat_id: String,
    },
}

fn default_smtp_port() -> u16 {
    587
}

impl ChannelConfig {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Email { .. } => ChannelKind::Email,
            Self::Whatsapp { .. } => ChannelKind::Whatsapp,
            Self::Telegram { .. } => ChannelKind::Telegram,
        }
    }

    /// Where messages end up: addresses, a phone number, or a chat id.
    pub fn targets(&self) -> Vec<String> {
        match self {
            Self::Email { recipients, .. } => recipients.clone(),
            Self::Whatsapp { phone_number, .. } => vec![phone_number.clone()],
            Self::Telegram { chat_id, .. } => vec![chat_id.clone()],
        }
    }

    fn validate(&self, errors: &mut Vec<ValidationError>) {
        match self {
            Self::Email {
                smtp_host,
                smtp_port,
                username,
                password,
                recipients,
            } => {
                require(errors, "smtp_host", smtp_host);
                require(errors, "username", username);
                require(errors, "password", password.expose_secret());
                if *smtp_port == 0 {
                    errors.push(ValidationError::Invalid {
                        field: "smtp_port",
                        reason: "port must be non-zero".to_owned(),
                    });
                }
                if recipients.is_empty() {
                    errors.push(ValidationError::Empty {
                        field: "recipients",
                    });
                }
                for r in recipients {
                    if !looks_like_email(r) {
                        errors.push(ValidationError::Invalid {
                            field: "recipients",
                            reason: format!("'{r}' is not an email address"),
                        });
                    }
                }
            }
            Self::Whatsapp {
                api_key,
                phone_number,
                instance_id,
            } => {
                require(errors, "api_key", api_key.expose_secret());
                require(errors, "instance_id", instance_id);
                require(errors, "phone_number", phone_number);
                let digits = phone_number.trim().trim_start_matches('+');
                if !digits.is_empty() && !digits.chars().all(|c| c.is_ascii_digit()) {
                    errors.push(ValidationError::Invalid {
                        field: "phone_number",
                        reason: "must contain only digits and an optional leading '+'".to_owned(),
                    });
                }
            }
            Self::Telegram { bot_token, chat_id } => {
                require(errors, "bot_token", bot_token.expose_secret());
                require(errors, "chat_id", chat_id);
            }
        }
    }
}

fn looks_like_email(s: &str) -> bool {
    let Some((local, domain)) = s.trim().split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email {
                smtp_host,
                smtp_port,
                username,
                recipients,
                ..
            } => f
                .debug_struct("Email")
                .field("smtp_host", smtp_host)
                .field("smtp_port", smtp_port)
                .field("username", username)
                .field("password", &"[REDACTED]")
                .field("recipients", recipients)
                .finish(),
            Self::Whatsapp {
                phone_number,
                instance_id,
                ..
            } => f
                .debug_struct("Whatsapp")
                .field("api_key", &"[REDACTED]")
                .field("phone_number", phone_number)
                .field("instance_id", instance_id)
                .finish(),
            Self::Telegram { chat_id, .. } => f
                .debug_struct("Telegram")
                .field("bot_token", &"[REDACTED]")
                .field("chat_id", chat_id)
                .finish(),
        }
    }
}

/// A configured notification destination.
#[derive(Debug, Deserialize)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub config: ChannelConfig,
}

fn default_enabled() -> bool {
    true
}

impl NotificationChannel {
    pub fn new(id: impl Into<String>, name: impl Into<String>, config: ChannelConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            config,
        }
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn kind(&self) -> ChannelKind {
        self.config.kind()
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        require(&mut errors, "id", &self.id);
        require(&mut errors, "name", &self.name);
        self.config.validate(&mut errors);
        errors
    }

    /// A credential-free view for listings.
    pub fn summary(&self) -> ChannelSummary {
        ChannelSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind(),
            enabled: self.enabled,
            targets: self.config.targets(),
        }
    }
}

/// What an operator sees when listing channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
    pub enabled: bool,
    pub targets: Vec<String>,
}
