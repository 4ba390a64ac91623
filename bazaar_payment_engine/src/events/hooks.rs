use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    AuctionDecidedEvent,
    EventHandler,
    EventProducer,
    Handler,
    PurchaseExpiredEvent,
    PurchaseSettledEvent,
};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub purchase_settled_producer: Vec<EventProducer<PurchaseSettledEvent>>,
    pub purchase_expired_producer: Vec<EventProducer<PurchaseExpiredEvent>>,
    pub auction_decided_producer: Vec<EventProducer<AuctionDecidedEvent>>,
}

pub struct EventHandlers {
    pub on_purchase_settled: Option<EventHandler<PurchaseSettledEvent>>,
    pub on_purchase_expired: Option<EventHandler<PurchaseExpiredEvent>>,
    pub on_auction_decided: Option<EventHandler<AuctionDecidedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_purchase_settled = hooks.on_purchase_settled.map(|f| EventHandler::new(buffer_size, f));
        let on_purchase_expired = hooks.on_purchase_expired.map(|f| EventHandler::new(buffer_size, f));
        let on_auction_decided = hooks.on_auction_decided.map(|f| EventHandler::new(buffer_size, f));
        Self { on_purchase_settled, on_purchase_expired, on_auction_decided }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_purchase_settled {
            result.purchase_settled_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_purchase_expired {
            result.purchase_expired_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_auction_decided {
            result.auction_decided_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_purchase_settled {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_purchase_expired {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_auction_decided {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_purchase_settled: Option<Handler<PurchaseSettledEvent>>,
    pub on_purchase_expired: Option<Handler<PurchaseExpiredEvent>>,
    pub on_auction_decided: Option<Handler<AuctionDecidedEvent>>,
}

impl EventHooks {
    pub fn on_purchase_settled<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PurchaseSettledEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_purchase_settled = Some(Arc::new(f));
        self
    }

    pub fn on_purchase_expired<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PurchaseExpiredEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_purchase_expired = Some(Arc::new(f));
        self
    }

    pub fn on_auction_decided<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(AuctionDecidedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_auction_decided = Some(Arc::new(f));
        self
    }
}
