//! End-to-end feed scenario over the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::timeout;
use uuid::Uuid;

use order_feed::{
    ConnectionManager, FeedConfig, FeedEvent, InMemoryOrderStore, LatencyTracker,
    MemoryTransport, RealtimeOrderFeed,
};
use shared::lifecycle::channel_for;
use shared::message::{ChangeNotification, FramePayload, WireFrame};
use shared::models::{Order, OrderItem, OrderStatus, Principal};
use shared::EventKind;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env(),
        )
        .with_test_writer()
        .try_init();
}

struct Harness {
    transport: Arc<MemoryTransport>,
    latency: Arc<LatencyTracker>,
    manager: ConnectionManager,
    store: Arc<InMemoryOrderStore>,
}

fn harness() -> Harness {
    init_tracing();
    let config = FeedConfig::new().with_heartbeat_interval(Duration::ZERO);
    let transport = Arc::new(MemoryTransport::new());
    let latency = Arc::new(LatencyTracker::new(config.latency_buffer_size));
    let manager = ConnectionManager::start(transport.clone(), latency.clone(), config);
    Harness {
        transport,
        latency,
        manager,
        store: Arc::new(InMemoryOrderStore::new()),
    }
}

fn assigned_order(driver_id: Uuid) -> Order {
    let items = vec![OrderItem {
        product_id: Uuid::new_v4(),
        name: "Margherita".to_string(),
        quantity: 1,
        price: Decimal::new(1250, 2),
    }];
    let mut order = Order::new(Uuid::new_v4(), items);
    order.status = OrderStatus::Assigned;
    order.driver_id = Some(driver_id);
    order
}

async fn next_event(
    events: &mut tokio::sync::broadcast::Receiver<FeedEvent>,
) -> Option<FeedEvent> {
    timeout(Duration::from_secs(1), events.recv()).await.ok()?.ok()
}

#[tokio::test]
async fn test_driver_feed_end_to_end() {
    let h = harness();
    let driver = Principal::driver(Uuid::new_v4());
    let own = assigned_order(driver.id);
    h.store.insert(own.clone());

    let feed = RealtimeOrderFeed::activate(driver, h.manager.clone(), h.store.clone())
        .await
        .unwrap();
    let mut events = feed.events();

    // Hydration happened before going live.
    assert_eq!(feed.orders(), vec![own.clone()]);
    assert_eq!(h.transport.open_channels(), vec![channel_for(&driver)]);

    // 1. A notification for a different driver arrives on the shared
    //    channel: it must never surface as an order event.
    let foreign = assigned_order(Uuid::new_v4());
    h.transport.push_frame(WireFrame::change(
        channel_for(&driver),
        ChangeNotification::new(EventKind::Update, foreign),
    ));
    match next_event(&mut events).await {
        Some(FeedEvent::Fault(_)) => {}
        other => panic!("foreign order produced {other:?}"),
    }
    assert_eq!(feed.orders(), vec![own.clone()]);

    // 2. The driver's own order moves ASSIGNED -> OUT_FOR_DELIVERY,
    //    with a correlated message id from a tracked send.
    let message_id = Uuid::new_v4();
    h.latency.track_send(message_id);
    let mut moved = own.clone();
    moved.status = OrderStatus::OutForDelivery;
    h.transport.push_frame(WireFrame::change(
        channel_for(&driver),
        ChangeNotification::new(EventKind::Update, moved.clone()).with_message_id(message_id),
    ));

    let mut saw_update = false;
    let mut status_changes = 0;
    while let Some(event) = next_event(&mut events).await {
        match event {
            FeedEvent::OrderUpdated(order) => {
                assert_eq!(order.status, OrderStatus::OutForDelivery);
                saw_update = true;
            }
            FeedEvent::StatusChanged { order_id, from, to } => {
                assert_eq!(order_id, own.id);
                assert_eq!(from, OrderStatus::Assigned);
                assert_eq!(to, OrderStatus::OutForDelivery);
                status_changes += 1;
            }
            other => panic!("unexpected event: {other:?}"),
        }
        if saw_update && status_changes == 1 {
            break;
        }
    }
    assert!(saw_update);
    assert_eq!(status_changes, 1, "status change must fire exactly once");

    // The correlated id produced a latency measurement.
    let measurements = h.latency.export_measurements();
    assert!(
        measurements.iter().any(|m| m.message_id == message_id),
        "correlated send id should be measured"
    );

    // No second StatusChanged lingers.
    assert!(next_event(&mut events).await.is_none());

    feed.deactivate().await.unwrap();
    feed.deactivate().await.unwrap();
    assert!(h.transport.open_channels().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_change_racing_activation_is_not_lost() {
    let h = harness();
    let driver = Principal::driver(Uuid::new_v4());
    let own = assigned_order(driver.id);
    h.store.insert(own.clone());

    let mut moved = own.clone();
    moved.status = OrderStatus::OutForDelivery;

    // A server pushing the update the instant the channel opens, while
    // activation is still mid-flight.
    let transport = h.transport.clone();
    let mut outbound = transport.outbound();
    let channel = channel_for(&driver);
    let frame = WireFrame::change(
        channel.clone(),
        ChangeNotification::new(EventKind::Update, moved),
    );
    tokio::spawn(async move {
        while let Ok(out) = outbound.recv().await {
            if out.channel == channel && matches!(out.payload, FramePayload::Open) {
                transport.push_frame(frame);
                break;
            }
        }
    });

    let feed = RealtimeOrderFeed::activate(driver, h.manager.clone(), h.store.clone())
        .await
        .unwrap();

    timeout(Duration::from_secs(2), async {
        loop {
            if feed.orders()[0].status == OrderStatus::OutForDelivery {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("a change racing activation must still land in the view");
}

#[tokio::test]
async fn test_illegal_jump_is_escalated_and_ignored() {
    let h = harness();
    let driver = Principal::driver(Uuid::new_v4());
    let own = assigned_order(driver.id);
    h.store.insert(own.clone());

    let feed = RealtimeOrderFeed::activate(driver, h.manager.clone(), h.store.clone())
        .await
        .unwrap();
    let mut events = feed.events();

    // ASSIGNED -> COMPLETED skips three stages.
    let mut jumped = own.clone();
    jumped.status = OrderStatus::Completed;
    h.transport.push_frame(WireFrame::change(
        channel_for(&driver),
        ChangeNotification::new(EventKind::Update, jumped),
    ));

    match next_event(&mut events).await {
        Some(FeedEvent::Fault(fault)) => {
            let text = fault.to_string();
            assert!(text.contains("illegal transition"), "got: {text}");
        }
        other => panic!("expected fault, got {other:?}"),
    }
    assert_eq!(feed.orders()[0].status, OrderStatus::Assigned);
}

#[tokio::test]
async fn test_message_after_deactivate_is_dropped() {
    let h = harness();
    let driver = Principal::driver(Uuid::new_v4());
    let own = assigned_order(driver.id);
    h.store.insert(own.clone());

    let feed = RealtimeOrderFeed::activate(driver, h.manager.clone(), h.store.clone())
        .await
        .unwrap();
    let mut events = feed.events();
    feed.deactivate().await.unwrap();

    // Racing delivery right after teardown must simply vanish.
    let mut moved = own.clone();
    moved.status = OrderStatus::OutForDelivery;
    h.transport.push_frame(WireFrame::change(
        channel_for(&driver),
        ChangeNotification::new(EventKind::Update, moved),
    ));

    assert!(next_event(&mut events).await.is_none());
    assert_eq!(feed.orders()[0].status, OrderStatus::Assigned);
}

#[tokio::test]
async fn test_restaurant_feed_scoped_to_own_orders() {
    let h = harness();
    let restaurant = Principal::restaurant(Uuid::new_v4());
    let own = Order::new(restaurant.id, vec![]);
    h.store.insert(own.clone());
    h.store.insert(Order::new(Uuid::new_v4(), vec![]));

    let feed = RealtimeOrderFeed::activate(restaurant, h.manager.clone(), h.store.clone())
        .await
        .unwrap();
    let mut events = feed.events();

    // Hydration already filtered to the owner.
    assert_eq!(feed.orders(), vec![own.clone()]);

    // A legal PENDING -> CONFIRMED advance flows through.
    let mut confirmed = own.clone();
    confirmed.status = OrderStatus::Confirmed;
    h.transport.push_frame(WireFrame::change(
        channel_for(&restaurant),
        ChangeNotification::new(EventKind::Update, confirmed),
    ));

    let mut saw_status = false;
    while let Some(event) = next_event(&mut events).await {
        if let FeedEvent::StatusChanged { from, to, .. } = event {
            assert_eq!(from, OrderStatus::Pending);
            assert_eq!(to, OrderStatus::Confirmed);
            saw_status = true;
            break;
        }
    }
    assert!(saw_status);
}
