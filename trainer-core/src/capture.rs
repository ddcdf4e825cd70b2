//! # Capture Subscription Module
//!
//! Live audio reaches the core as fixed-size mono frames. A [`CaptureSource`]
//! hands each frame to every registered handler; handlers are removed when
//! their [`CaptureSubscription`] guard is dropped, so a subscriber can never
//! outlive the scope that created it.
//!
//! [`FrameBus`] is the in-process implementation. The cpal adapter in
//! [`crate::audio`] publishes microphone frames into a bus from a dispatcher
//! thread; tests publish synthetic frames directly.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// A per-frame callback. Runs on the frame dispatcher thread.
pub type FrameHandler = Box<dyn FnMut(&[f32]) + Send>;

/// Source of live mono audio frames.
pub trait CaptureSource: Send + Sync {
    /// Sample rate of delivered frames in Hz.
    fn sample_rate(&self) -> u32;

    /// Registers `handler` for every subsequent frame until the returned guard
    /// is dropped.
    fn subscribe(&self, handler: FrameHandler) -> CaptureSubscription;
}

/// Something that can drop a subscription by id.
pub trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: u64);
}

/// Guard for a registered frame handler. Dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct CaptureSubscription {
    id: u64,
    owner: Weak<dyn Unsubscribe>,
}

impl CaptureSubscription {
    pub fn new(id: u64, owner: Weak<dyn Unsubscribe>) -> Self {
        Self { id, owner }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CaptureSubscription {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for CaptureSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSubscription").field("id", &self.id).finish()
    }
}

#[derive(Default)]
struct Registry {
    handlers: Mutex<BTreeMap<u64, FrameHandler>>,
    next_id: AtomicU64,
}

impl Unsubscribe for Registry {
    fn unsubscribe(&self, id: u64) {
        if self.handlers.lock().remove(&id).is_some() {
            log::debug!("Capture subscriber {} removed", id);
        }
    }
}

/// Fan-out of captured frames to the current subscribers.
#[derive(Clone)]
pub struct FrameBus {
    sample_rate: u32,
    registry: Arc<Registry>,
}

impl FrameBus {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            registry: Arc::new(Registry::default()),
        }
    }

    /// Delivers one frame to every subscriber, in subscription order.
    ///
    /// A handler that panics is dropped from the bus; the others still see the
    /// frame.
    pub fn publish(&self, frame: &[f32]) {
        let mut handlers = self.registry.handlers.lock();
        let mut failed = Vec::new();
        for (id, handler) in handlers.iter_mut() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(frame)));
            if outcome.is_err() {
                log::error!("Capture subscriber {} panicked, removing it", id);
                failed.push(*id);
            }
        }
        for id in failed {
            handlers.remove(&id);
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.registry.handlers.lock().len()
    }
}

impl CaptureSource for FrameBus {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn subscribe(&self, handler: FrameHandler) -> CaptureSubscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.handlers.lock().insert(id, handler);
        log::debug!("Capture subscriber {} added", id);
        let registry: Arc<dyn Unsubscribe> = self.registry.clone();
        CaptureSubscription::new(id, Arc::downgrade(&registry))
    }
}

impl std::fmt::Debug for FrameBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBus")
            .field("sample_rate", &self.sample_rate)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_publish_reaches_subscribers_until_dropped() {
        let bus = FrameBus::new(44_100);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let subscription = bus.subscribe(Box::new(move |frame: &[f32]| {
            counter.fetch_add(frame.len(), Ordering::SeqCst);
        }));
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(&[0.0; 8]);
        bus.publish(&[0.0; 8]);
        assert_eq!(seen.load(Ordering::SeqCst), 16);

        drop(subscription);
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(&[0.0; 8]);
        assert_eq!(seen.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let bus = FrameBus::new(44_100);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let _bad = bus.subscribe(Box::new(|_: &[f32]| panic!("boom")));
        let _good = bus.subscribe(Box::new(move |_: &[f32]| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        bus.publish(&[0.0; 4]);
        bus.publish(&[0.0; 4]);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_subscription_outliving_bus_is_harmless() {
        let bus = FrameBus::new(8_000);
        let subscription = bus.subscribe(Box::new(|_: &[f32]| {}));
        drop(bus);
        drop(subscription);
    }
}
