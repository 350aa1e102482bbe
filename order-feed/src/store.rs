//! Backing-store interface
//!
//! The feed hydrates its initial order view through a one-shot
//! authorized query before trusting live updates. The store itself is
//! an external collaborator; this core never writes to it.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::FeedError;
use shared::lifecycle::may_observe;
use shared::models::{Order, OrderStatus, Principal};

/// Hydration query filter
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    /// Restrict to these statuses; `None` means all
    pub statuses: Option<Vec<OrderStatus>>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        match &self.statuses {
            Some(statuses) => statuses.contains(&order.status),
            None => true,
        }
    }
}

/// One-shot authorized order query
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// List the orders `principal` is authorized to see.
    async fn list_orders(
        &self,
        principal: &Principal,
        filter: &OrderFilter,
    ) -> Result<Vec<Order>, FeedError>;
}

/// In-memory store for tests and in-process wiring
///
/// Applies the visibility predicate itself, like the real authorized
/// query does server-side.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<Vec<Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: Order) {
        self.orders.lock().unwrap().push(order);
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn list_orders(
        &self,
        principal: &Principal,
        filter: &OrderFilter,
    ) -> Result<Vec<Order>, FeedError> {
        let orders = self.orders.lock().unwrap();
        Ok(orders
            .iter()
            .filter(|order| may_observe(principal, order) && filter.matches(order))
            .cloned()
            .collect())
    }
}
