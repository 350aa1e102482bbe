//! Realtime order feed
//!
//! The public surface of the core: one live, visibility-scoped order
//! view per principal. Composes the connection manager with the shared
//! lifecycle rules, re-validating every inbound payload even though the
//! server enforces the same table, and emits typed events on a single
//! broadcast channel per feed instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connection::{ConnectionEvent, ConnectionHealth, ConnectionManager};
use crate::error::{FeedFault, FeedResult};
use crate::store::{OrderFilter, OrderStore};
use shared::lifecycle::{channel_for, is_legal_transition, may_observe};
use shared::message::{ChangeNotification, EventKind};
use shared::models::{Order, OrderStatus, Principal};

/// Typed feed event
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// An order row changed (or appeared) in this principal's view
    OrderUpdated(Order),
    /// An order transitioned into `Assigned` within this view; for a
    /// driver feed this is their new assignment
    OrderAssigned(Order),
    /// A validated status transition
    StatusChanged {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },
    /// An order row left the view
    OrderRemoved(Uuid),
    /// Connection quality changed; recomputed at emission time
    HealthChanged(ConnectionHealth),
    /// Operating fault (see [`FeedFault`] taxonomy)
    Fault(FeedFault),
}

/// Live order list for one principal
///
/// Hydrates from the backing store before trusting live updates, then
/// maintains the view from validated change notifications.
pub struct RealtimeOrderFeed {
    principal: Principal,
    manager: ConnectionManager,
    channel: String,
    orders: Arc<Mutex<HashMap<Uuid, Order>>>,
    event_tx: broadcast::Sender<FeedEvent>,
    cancel: CancellationToken,
}

impl RealtimeOrderFeed {
    /// Hydrate and go live.
    ///
    /// The one-shot store query runs first so callers never act on a
    /// partial view; only then is the change channel subscribed.
    pub async fn activate(
        principal: Principal,
        manager: ConnectionManager,
        store: Arc<dyn OrderStore>,
    ) -> FeedResult<Self> {
        let hydrated = store
            .list_orders(&principal, &OrderFilter::default())
            .await?;
        let orders: HashMap<Uuid, Order> =
            hydrated.into_iter().map(|order| (order.id, order)).collect();
        tracing::info!(
            "Feed for {} {} hydrated with {} orders",
            principal.role,
            principal.id,
            orders.len()
        );

        let channel = channel_for(&principal);
        // Take the manager's receiver before subscribing, so a change
        // delivered the instant the channel opens is already buffered
        // for the dispatch task instead of vanishing.
        let manager_events = manager.events();
        manager.subscribe(&channel).await?;

        let (event_tx, _) = broadcast::channel(manager.config().event_buffer_size);
        let feed = Self {
            principal,
            manager,
            channel,
            orders: Arc::new(Mutex::new(orders)),
            event_tx,
            cancel: CancellationToken::new(),
        };

        feed.spawn_dispatch(manager_events);
        Ok(feed)
    }

    /// Listen to this feed's typed events.
    pub fn events(&self) -> broadcast::Receiver<FeedEvent> {
        self.event_tx.subscribe()
    }

    /// Snapshot of the current order view.
    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().unwrap().values().cloned().collect()
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Current connection health, recomputed now.
    pub fn health(&self) -> ConnectionHealth {
        self.manager.health()
    }

    /// Stop the feed: unsubscribe its channel and cancel its dispatch
    /// task. Idempotent; a message racing deactivation is dropped.
    pub async fn deactivate(&self) -> FeedResult<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.cancel.cancel();
        self.manager.unsubscribe(&self.channel).await?;
        tracing::info!("Feed for {} deactivated", self.principal.id);
        Ok(())
    }

    fn spawn_dispatch(&self, mut events: broadcast::Receiver<ConnectionEvent>) {
        let principal = self.principal;
        let channel = self.channel.clone();
        let orders = self.orders.clone();
        let event_tx = self.event_tx.clone();
        let manager = self.manager.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(ConnectionEvent::Change {
                        channel: from_channel,
                        notification,
                    }) => {
                        // Other feeds may share this manager.
                        if from_channel != channel {
                            continue;
                        }
                        dispatch_change(&principal, &orders, &event_tx, notification);
                    }
                    Ok(ConnectionEvent::StateChanged(_)) => {
                        let _ = event_tx.send(FeedEvent::HealthChanged(manager.health()));
                    }
                    Ok(ConnectionEvent::Fault(fault)) => {
                        let _ = event_tx.send(FeedEvent::Fault(fault));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Feed dispatch lagged, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

/// Validate one change against the rule table and fold it into the
/// order view. Invalid payloads are dropped and reported, never
/// surfaced as state.
fn dispatch_change(
    principal: &Principal,
    orders: &Mutex<HashMap<Uuid, Order>>,
    event_tx: &broadcast::Sender<FeedEvent>,
    notification: ChangeNotification,
) {
    let order = notification.row;

    // Defense in depth: the transport's own scoping is not trusted.
    if !may_observe(principal, &order) {
        tracing::warn!(
            "Dropping payload for order {} not visible to {} {}",
            order.id,
            principal.role,
            principal.id
        );
        let _ = event_tx.send(FeedEvent::Fault(FeedFault::UnauthorizedPayload {
            channel: channel_for(principal),
            order_id: order.id,
        }));
        return;
    }

    match notification.kind {
        EventKind::Insert => {
            orders.lock().unwrap().insert(order.id, order.clone());
            let _ = event_tx.send(FeedEvent::OrderUpdated(order));
        }
        EventKind::Delete => {
            orders.lock().unwrap().remove(&order.id);
            let _ = event_tx.send(FeedEvent::OrderRemoved(order.id));
        }
        EventKind::Update => {
            let previous = orders.lock().unwrap().get(&order.id).map(|o| o.status);

            if let Some(from) = previous {
                let changed = from != order.status;
                if changed && !is_legal_transition(from, order.status) {
                    // Disagreement with the source of truth; escalate,
                    // do not apply.
                    tracing::error!(
                        "Data integrity anomaly: order {} claims {} -> {}",
                        order.id,
                        from,
                        order.status
                    );
                    let _ = event_tx.send(FeedEvent::Fault(FeedFault::IllegalTransition {
                        order_id: order.id,
                        from,
                        to: order.status,
                    }));
                    return;
                }

                orders.lock().unwrap().insert(order.id, order.clone());
                let _ = event_tx.send(FeedEvent::OrderUpdated(order.clone()));
                if changed {
                    if order.status == OrderStatus::Assigned {
                        let _ = event_tx.send(FeedEvent::OrderAssigned(order.clone()));
                    }
                    let _ = event_tx.send(FeedEvent::StatusChanged {
                        order_id: order.id,
                        from,
                        to: order.status,
                    });
                }
            } else {
                // First sighting: the order just became visible (e.g. a
                // driver's fresh assignment). No previous status, so
                // there is no transition to validate or report.
                orders.lock().unwrap().insert(order.id, order.clone());
                let _ = event_tx.send(FeedEvent::OrderUpdated(order.clone()));
                if order.status == OrderStatus::Assigned {
                    let _ = event_tx.send(FeedEvent::OrderAssigned(order));
                }
            }
        }
    }
}
