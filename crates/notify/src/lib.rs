//! Notification delivery for vaultline.
//!
//! A [`Dispatcher`] turns engine events into messages and fans them out to the
//! configured channels through the [`Notifier`] registered for each channel
//! kind.

pub mod dispatcher;
pub mod error;
pub mod log;
pub mod message;
pub mod notifier;
pub mod policy;
pub mod registry;

pub use dispatcher::{ChannelDelivery, DeliveryOutcome, Dispatcher, DispatcherConfig};
pub use error::NotifierError;
pub use log::LogNotifier;
pub use message::NotificationMessage;
pub use notifier::{DeliveryReceipt, DynNotifier, Notifier};
pub use policy::NotificationPolicy;
pub use registry::NotifierRegistry;
