use tokio::sync::watch;

/// Wakes subscribers whenever new work was written to a catalog.
///
/// Only the latest intent is retained; subscribers re-read the catalog on wake-up.
pub struct IntentChannel<T> {
    intent_tx: watch::Sender<T>,
    intent_rx: watch::Receiver<T>,
}

impl<T: Clone> IntentChannel<T> {
    pub fn new(initial: T) -> Self {
        let (intent_tx, intent_rx) = watch::channel(initial);
        Self {
            intent_tx,
            intent_rx,
        }
    }

    pub fn notify_intent(&self, intent: T) {
        // The channel owns a receiver, so sending cannot fail
        let _ = self.intent_tx.send(intent);
    }

    pub fn subscribe_intent(&self) -> watch::Receiver<T> {
        self.intent_rx.clone()
    }
}

pub trait NotifiableCatalog {
    type Intent;

    fn subscribe_intent(&self) -> watch::Receiver<Self::Intent>;
}
