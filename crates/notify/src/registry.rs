use std::collections::HashMap;
use std::sync::Arc;

use vaultline_core::ChannelKind;

use crate::log::LogNotifier;
use crate::notifier::DynNotifier;

/// Maps channel kinds to the notifier that delivers them.
///
/// Built once at startup and then shared behind an `Arc`.
#[derive(Default)]
pub struct NotifierRegistry {
    notifiers: HashMap<ChannelKind, Arc<dyn DynNotifier>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with a [`LogNotifier`] for every kind.
    pub fn with_log_notifiers() -> Self {
        let mut registry = Self::new();
        for kind in [ChannelKind::Email, ChannelKind::Whatsapp, ChannelKind::Telegram] {
            registry.register(Arc::new(LogNotifier::new(kind)));
        }
        registry
    }

    /// Register a notifier under its own kind, replacing any previous one.
    pub fn register(&mut self, notifier: Arc<dyn DynNotifier>) {
        self.notifiers.insert(notifier.kind(), notifier);
    }

    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn DynNotifier>> {
        self.notifiers.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}
