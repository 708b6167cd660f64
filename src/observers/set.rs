//! # ObserverSet: non-blocking fan-out of events to observers.
//!
//! ## Guarantees
//! - `emit(&Event)` returns immediately.
//! - Per-observer FIFO.
//! - A panicking observer is isolated; the panic is reported on the bus.
//!
//! ## Non-guarantees
//! - No ordering across observers.
//! - No retry on overflow: the event is dropped for that observer only.

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::events::{Bus, Event, EventKind};

use super::Observe;

struct ObserverChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Observers with one bounded queue and worker each.
pub struct ObserverSet {
    channels: Vec<ObserverChannel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl ObserverSet {
    /// Spawns one worker per observer. Overflow and panics are reported on `bus`.
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn Observe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(observers.len());
        let mut workers = Vec::with_capacity(observers.len());

        for obs in observers {
            let name = obs.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(obs.queue_capacity().max(1));
            let worker_bus = bus.clone();

            let handle = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = obs.on_event(ev.as_ref());
                    if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        let info = panic_message(panic.as_ref());
                        tracing::error!(observer = name, panic = %info, "observer panicked");
                        // never report a panic raised while handling a panic report
                        if !matches!(ev.kind, EventKind::ObserverPanicked) {
                            worker_bus.publish(Event::observer_panicked(name, info));
                        }
                    }
                }
            });

            channels.push(ObserverChannel { name, sender: tx });
            workers.push(handle);
        }

        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Hands one event to every observer without waiting.
    pub fn emit(&self, event: &Event) {
        let ev = Arc::new(event.clone());
        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(&ev)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "queue full",
                Err(mpsc::error::TrySendError::Closed(_)) => "worker closed",
            };
            tracing::warn!(observer = channel.name, reason, "observer dropped event");
            if !matches!(
                event.kind,
                EventKind::ObserverOverflow | EventKind::ObserverPanicked
            ) {
                self.bus
                    .publish(Event::observer_overflow(channel.name, reason));
            }
        }
    }

    /// Closes every queue and waits for the workers to drain them.
    pub async fn shutdown(self) {
        drop(self.channels);
        for worker in self.workers {
            let _ = worker.await;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<EventKind>>,
    }

    #[async_trait]
    impl Observe for Recorder {
        async fn on_event(&self, ev: &Event) {
            self.seen.lock().push(ev.kind);
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Panicker;

    #[async_trait]
    impl Observe for Panicker {
        async fn on_event(&self, _ev: &Event) {
            panic!("boom");
        }

        fn name(&self) -> &'static str {
            "panicker"
        }
    }

    #[tokio::test]
    async fn panicking_observer_does_not_affect_others() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let recorder = Arc::new(Recorder::default());
        let observers: Vec<Arc<dyn Observe>> = vec![Arc::new(Panicker), recorder.clone()];
        let set = ObserverSet::new(observers, bus.clone());
        assert_eq!(set.len(), 2);

        set.emit(&Event::new(EventKind::Delivered));
        set.emit(&Event::new(EventKind::Replied));

        let reported = rx.recv().await.unwrap();
        assert_eq!(reported.kind, EventKind::ObserverPanicked);
        assert_eq!(reported.channel.as_deref(), Some("panicker"));
        assert_eq!(reported.reason.as_deref(), Some("boom"));

        set.shutdown().await;
        assert_eq!(
            *recorder.seen.lock(),
            vec![EventKind::Delivered, EventKind::Replied]
        );
    }
}
