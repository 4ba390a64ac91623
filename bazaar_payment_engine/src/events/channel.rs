//! Simple stateless pub-sub event handler
//!
//! This module provides a simple hook system that lets components of the system subscribe to settlement
//! engine events and react to them. The event handler is stateless, i.e. the handlers have no access to the
//! internal state of the system. All that is received is the event itself.
//!
//! However, the handlers can be async.
use std::{future::Future, pin::Pin, sync::Arc};

use log::*;
use tokio::{sync::mpsc, task::JoinSet};

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct EventHandler<E: Send + Sync + 'static> {
    listener: mpsc::Receiver<E>,
    sender: mpsc::Sender<E>,
    handler: Handler<E>,
}

impl<E: Send + Sync + 'static> EventHandler<E> {
    pub fn new(buffer_size: usize, handler: Handler<E>) -> Self {
        let (sender, listener) = mpsc::channel(buffer_size);
        Self { listener, sender, handler }
    }

    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer::new(self.sender.clone())
    }

    /// Runs until the last producer is dropped, then waits for the in-flight handler tasks to finish.
    pub async fn start_handler(mut self) {
        debug!("📬️ Starting event handler");
        // drop the internal sender so that when the last subscriber is dropped, we can automatically shut
        // down the handler
        drop(self.sender);
        let mut jobs = JoinSet::new();
        while let Some(ev) = self.listener.recv().await {
            trace!("📬️ Handling event");
            let handler = Arc::clone(&self.handler);
            jobs.spawn(async move {
                (handler)(ev).await;
                trace!("📬️ Event handled");
            });
            // Reap completed tasks as we go, so the set does not grow with the event count.
            while let Some(completed) = jobs.try_join_next() {
                if let Err(e) = completed {
                    warn!("📬️ An event handler task panicked: {e}");
                }
            }
        }
        debug!("📬️ Waiting for {} remaining event handler jobs", jobs.len());
        while let Some(completed) = jobs.join_next().await {
            if let Err(e) = completed {
                warn!("📬️ An event handler task panicked: {e}");
            }
        }
        debug!("📬️ Event handler has shut down");
    }
}

#[derive(Clone)]
pub struct EventProducer<E: Send + Sync> {
    sender: mpsc::Sender<E>,
}

impl<E: Send + Sync> EventProducer<E> {
    pub fn new(sender: mpsc::Sender<E>) -> Self {
        Self { sender }
    }

    pub async fn publish_event(&self, event: E) {
        if let Err(e) = self.sender.send(event).await {
            error!("📬️ Failed to send event: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[tokio::test]
    async fn handler_sees_every_event_from_every_producer() {
        let _ = env_logger::try_init();
        let total = Arc::new(AtomicU64::new(0));
        let sum = total.clone();
        let handler = Arc::new(move |v: u64| {
            let total = total.clone();
            Box::pin(async move {
                debug!("Handler received {v}");
                let _ = total.fetch_add(v, Ordering::SeqCst);
                tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        let event_handler = EventHandler::new(2, handler);
        let odds = event_handler.subscribe();
        let evens = event_handler.subscribe();
        tokio::spawn(async move {
            for v in (1..=10).filter(|v| v % 2 == 1) {
                odds.publish_event(v).await;
            }
        });
        tokio::spawn(async move {
            for v in (1..=10).filter(|v| v % 2 == 0) {
                evens.publish_event(v).await;
            }
        });

        event_handler.start_handler().await;
        assert_eq!(sum.load(Ordering::SeqCst), 55);
    }
}
