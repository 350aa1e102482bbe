//! Order Model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order status
///
/// The directed transition graph over these states lives in
/// [`crate::lifecycle`]; nothing else may decide which moves are legal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Priced,
    Assigned,
    OutForDelivery,
    Delivered,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// States in which an order must carry an assigned driver.
    pub fn requires_driver(&self) -> bool {
        matches!(
            self,
            OrderStatus::Assigned
                | OrderStatus::OutForDelivery
                | OrderStatus::Delivered
                | OrderStatus::Completed
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Priced => "PRICED",
            OrderStatus::Assigned => "ASSIGNED",
            OrderStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Order line item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    /// Product reference
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    /// Unit price in currency unit
    pub price: Decimal,
}

/// Order entity (one distribution request)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub status: OrderStatus,
    /// Owning restaurant reference
    pub restaurant_id: Uuid,
    /// Assigned driver; `None` until the order reaches `Assigned`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    /// Set once, when the order reaches `Delivered`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    /// Monetary total in currency unit
    pub total: Decimal,
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Create a fresh order in `Pending` for the given restaurant.
    pub fn new(restaurant_id: Uuid, items: Vec<OrderItem>) -> Self {
        let total = items
            .iter()
            .map(|item| item.price * Decimal::from(item.quantity))
            .sum();
        Self {
            id: Uuid::new_v4(),
            status: OrderStatus::Pending,
            restaurant_id,
            driver_id: None,
            created_at: Utc::now(),
            delivered_at: None,
            total,
            items,
        }
    }
}
