//! Handler surface for external consumers (the CLI is just one of them).
//!
//! Handlers fire synchronously in declaration order from the multiplexer's
//! per-event task. The registry is snapshotted before dispatch, so a
//! handler may register further handlers or trigger sends without
//! deadlocking the pipeline.

use std::sync::{Arc, Mutex};

use tracing::warn;
use uuid::Uuid;

use omnicast_shared::{Envelope, Protocol};

type MessageHandler = Arc<dyn Fn(&Envelope, Protocol) + Send + Sync>;
type ReceiptHandler = Arc<dyn Fn(Uuid, Protocol, bool) + Send + Sync>;

#[derive(Default)]
pub struct HandlerRegistry {
    message_handlers: Mutex<Vec<MessageHandler>>,
    receipt_handlers: Mutex<Vec<ReceiptHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_message(&self, handler: impl Fn(&Envelope, Protocol) + Send + Sync + 'static) {
        self.lock_messages().push(Arc::new(handler));
    }

    /// Receipt handlers see every delivery, duplicates included (the
    /// `is_duplicate` flag lets a UI update timings without re-rendering
    /// the message).
    pub fn on_receipt(&self, handler: impl Fn(Uuid, Protocol, bool) + Send + Sync + 'static) {
        self.lock_receipts().push(Arc::new(handler));
    }

    pub fn fire_message(&self, envelope: &Envelope, via: Protocol) {
        let handlers: Vec<MessageHandler> = self.lock_messages().clone();
        for handler in handlers {
            handler(envelope, via);
        }
    }

    pub fn fire_receipt(&self, uuid: Uuid, via: Protocol, is_duplicate: bool) {
        let handlers: Vec<ReceiptHandler> = self.lock_receipts().clone();
        for handler in handlers {
            handler(uuid, via, is_duplicate);
        }
    }

    fn lock_messages(&self) -> std::sync::MutexGuard<'_, Vec<MessageHandler>> {
        match self.message_handlers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("message handler registry lock poisoned");
                poisoned.into_inner()
            }
        }
    }

    fn lock_receipts(&self) -> std::sync::MutexGuard<'_, Vec<ReceiptHandler>> {
        match self.receipt_handlers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("receipt handler registry lock poisoned");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn envelope() -> Envelope {
        Envelope::new_message("hi", "magnet:?xt=urn:identity:v1").unwrap()
    }

    #[test]
    fn test_declaration_order() {
        let registry = HandlerRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            registry.on_message(move |_, _| order.lock().unwrap().push(tag));
        }

        registry.fire_message(&envelope(), Protocol::Nostr);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_handler_may_register_during_dispatch() {
        let registry = Arc::new(HandlerRegistry::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let inner_registry = registry.clone();
        let inner_fired = fired.clone();
        registry.on_message(move |_, _| {
            let fired = inner_fired.clone();
            inner_registry.on_message(move |_, _| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        });

        // No deadlock; the late handler fires from the next event on.
        registry.fire_message(&envelope(), Protocol::Mqtt);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        registry.fire_message(&envelope(), Protocol::Mqtt);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_receipt_duplicate_flag() {
        let registry = HandlerRegistry::new();
        let duplicates = Arc::new(AtomicUsize::new(0));

        let counter = duplicates.clone();
        registry.on_receipt(move |_, _, is_duplicate| {
            if is_duplicate {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let uuid = Uuid::new_v4();
        registry.fire_receipt(uuid, Protocol::Iroh, false);
        registry.fire_receipt(uuid, Protocol::Waku, true);
        assert_eq!(duplicates.load(Ordering::SeqCst), 1);
    }
}
