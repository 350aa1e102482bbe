//! Order lifecycle rules
//!
//! The single source of truth for the status transition graph, the
//! role-gated transition rights, and the visibility predicate. The
//! server-side access layer and the client-side feed filter both link
//! this module; any change here is a protocol change for both sides.
//!
//! Transition graph:
//!
//! ```text
//! PENDING -> CONFIRMED -> PRICED -> ASSIGNED -> OUT_FOR_DELIVERY -> DELIVERED -> COMPLETED
//! (any non-terminal except DELIVERED) -> CANCELLED
//! ```

use thiserror::Error;

use crate::models::{Order, OrderStatus, Principal, Role};

/// Lifecycle rule violation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// The (from, to) pair is not an edge of the transition graph
    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    /// The order is in a terminal state; nothing may move it
    #[error("order is terminal in state {0}")]
    TerminalState(OrderStatus),

    /// The transition is legal but this actor does not own it
    #[error("{role} may not transition {from} -> {to}")]
    NotPermitted {
        role: Role,
        from: OrderStatus,
        to: OrderStatus,
    },
}

/// The next stage in the happy path, if any.
pub fn next_stage(from: OrderStatus) -> Option<OrderStatus> {
    use OrderStatus::*;
    match from {
        Pending => Some(Confirmed),
        Confirmed => Some(Priced),
        Priced => Some(Assigned),
        Assigned => Some(OutForDelivery),
        OutForDelivery => Some(Delivered),
        Delivered => Some(Completed),
        Completed | Cancelled => None,
    }
}

/// Whether `from -> to` is an edge of the transition graph.
///
/// The only out-of-sequence edge is cancellation, reachable from every
/// pre-delivery state. Terminal states have no outgoing edges.
pub fn is_legal_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;

    if from.is_terminal() {
        return false;
    }
    if to == Cancelled {
        // Delivered orders settle to Completed; they can no longer cancel.
        return !matches!(from, Delivered);
    }
    next_stage(from) == Some(to)
}

/// Whether `principal` may trigger `from -> to` on `order`.
///
/// Legality of the edge itself is checked separately; this only answers
/// the ownership question.
pub fn may_transition(
    principal: &Principal,
    order: &Order,
    from: OrderStatus,
    to: OrderStatus,
) -> bool {
    use OrderStatus::*;
    match principal.role {
        Role::Admin => true,
        Role::Restaurant => {
            order.restaurant_id == principal.id
                && matches!(
                    (from, to),
                    (Pending, Confirmed) | (Confirmed, Priced) | (_, Cancelled)
                )
        }
        Role::Driver => {
            order.driver_id == Some(principal.id)
                && matches!((from, to), (Assigned, OutForDelivery) | (OutForDelivery, Delivered))
        }
    }
}

/// Validate and apply a status transition on `order`.
///
/// Checks terminality, edge legality, then actor rights, in that order,
/// so a rejected terminal move reports `TerminalState` rather than a
/// generic illegal edge. Sets `delivered_at` when the order reaches
/// `Delivered`.
pub fn apply_transition(
    order: &mut Order,
    to: OrderStatus,
    principal: &Principal,
) -> Result<(), LifecycleError> {
    let from = order.status;

    if from.is_terminal() {
        return Err(LifecycleError::TerminalState(from));
    }
    if !is_legal_transition(from, to) {
        return Err(LifecycleError::IllegalTransition { from, to });
    }
    if !may_transition(principal, order, from, to) {
        return Err(LifecycleError::NotPermitted {
            role: principal.role,
            from,
            to,
        });
    }

    order.status = to;
    if to == OrderStatus::Delivered {
        order.delivered_at = Some(chrono::Utc::now());
    }
    Ok(())
}

/// Whether `principal` may observe change notifications for `order`.
///
/// Evaluated twice by design: once to pick the channel a principal may
/// subscribe to, and again on every inbound payload, because the
/// transport's own enforcement is not trusted as the sole line of
/// defense.
pub fn may_observe(principal: &Principal, order: &Order) -> bool {
    match principal.role {
        Role::Admin => true,
        Role::Restaurant => order.restaurant_id == principal.id,
        Role::Driver => order.driver_id == Some(principal.id),
    }
}

/// The visibility-scoped channel name for a principal.
pub fn channel_for(principal: &Principal) -> String {
    match principal.role {
        Role::Restaurant => format!("orders:restaurant:{}", principal.id),
        Role::Driver => format!("orders:driver:{}", principal.id),
        Role::Admin => "orders:all".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const ALL: [OrderStatus; 8] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Priced,
        OrderStatus::Assigned,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    fn order_for(restaurant_id: Uuid, status: OrderStatus, driver_id: Option<Uuid>) -> Order {
        let mut order = Order::new(restaurant_id, vec![]);
        order.status = status;
        order.driver_id = driver_id;
        order
    }

    #[test]
    fn test_happy_path_edges_are_legal() {
        use OrderStatus::*;
        for (from, to) in [
            (Pending, Confirmed),
            (Confirmed, Priced),
            (Priced, Assigned),
            (Assigned, OutForDelivery),
            (OutForDelivery, Delivered),
            (Delivered, Completed),
        ] {
            assert!(is_legal_transition(from, to), "{from} -> {to}");
        }
    }

    #[test]
    fn test_cancellation_reachable_pre_delivery_only() {
        use OrderStatus::*;
        for from in [Pending, Confirmed, Priced, Assigned, OutForDelivery] {
            assert!(is_legal_transition(from, Cancelled), "{from} -> CANCELLED");
        }
        assert!(!is_legal_transition(Delivered, Cancelled));
        assert!(!is_legal_transition(Completed, Cancelled));
        assert!(!is_legal_transition(Cancelled, Cancelled));
    }

    #[test]
    fn test_no_stage_skipping() {
        use OrderStatus::*;
        // Exhaustive: every pair not on the happy path and not a
        // cancellation edge must be rejected.
        for from in ALL {
            for to in ALL {
                let legal = next_stage(from) == Some(to)
                    || (to == Cancelled
                        && !from.is_terminal()
                        && from != Delivered);
                assert_eq!(is_legal_transition(from, to), legal, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for to in ALL {
            assert!(!is_legal_transition(OrderStatus::Completed, to));
            assert!(!is_legal_transition(OrderStatus::Cancelled, to));
        }
    }

    #[test]
    fn test_restaurant_gates() {
        use OrderStatus::*;
        let restaurant = Principal::restaurant(Uuid::new_v4());
        let own = order_for(restaurant.id, Pending, None);
        let foreign = order_for(Uuid::new_v4(), Pending, None);

        assert!(may_transition(&restaurant, &own, Pending, Confirmed));
        assert!(may_transition(&restaurant, &own, Confirmed, Priced));
        assert!(may_transition(&restaurant, &own, Priced, Cancelled));
        // Not the owner
        assert!(!may_transition(&restaurant, &foreign, Pending, Confirmed));
        // Not a restaurant move even on its own order
        assert!(!may_transition(&restaurant, &own, Assigned, OutForDelivery));
    }

    #[test]
    fn test_driver_gates() {
        use OrderStatus::*;
        let driver = Principal::driver(Uuid::new_v4());
        let own = order_for(Uuid::new_v4(), Assigned, Some(driver.id));
        let foreign = order_for(Uuid::new_v4(), Assigned, Some(Uuid::new_v4()));

        assert!(may_transition(&driver, &own, Assigned, OutForDelivery));
        assert!(may_transition(&driver, &own, OutForDelivery, Delivered));
        assert!(!may_transition(&driver, &foreign, Assigned, OutForDelivery));
        assert!(!may_transition(&driver, &own, Pending, Confirmed));
        assert!(!may_transition(&driver, &own, Priced, Cancelled));
    }

    #[test]
    fn test_admin_may_do_any_legal_move() {
        use OrderStatus::*;
        let admin = Principal::admin(Uuid::new_v4());
        let order = order_for(Uuid::new_v4(), Priced, None);
        assert!(may_transition(&admin, &order, Priced, Assigned));
        assert!(may_transition(&admin, &order, Pending, Confirmed));
    }

    #[test]
    fn test_apply_transition_mutates_and_stamps_delivery() {
        use OrderStatus::*;
        let driver = Principal::driver(Uuid::new_v4());
        let mut order = order_for(Uuid::new_v4(), OutForDelivery, Some(driver.id));

        apply_transition(&mut order, Delivered, &driver).unwrap();
        assert_eq!(order.status, Delivered);
        assert!(order.delivered_at.is_some());
    }

    #[test]
    fn test_apply_transition_rejections() {
        use OrderStatus::*;
        let admin = Principal::admin(Uuid::new_v4());
        let mut completed = order_for(Uuid::new_v4(), Completed, Some(Uuid::new_v4()));
        assert_eq!(
            apply_transition(&mut completed, Cancelled, &admin),
            Err(LifecycleError::TerminalState(Completed))
        );

        let mut pending = order_for(Uuid::new_v4(), Pending, None);
        assert_eq!(
            apply_transition(&mut pending, Assigned, &admin),
            Err(LifecycleError::IllegalTransition {
                from: Pending,
                to: Assigned
            })
        );

        let driver = Principal::driver(Uuid::new_v4());
        let mut assigned = order_for(Uuid::new_v4(), Assigned, Some(Uuid::new_v4()));
        assert!(matches!(
            apply_transition(&mut assigned, OutForDelivery, &driver),
            Err(LifecycleError::NotPermitted { .. })
        ));
        // Rejected attempts leave the order untouched.
        assert_eq!(assigned.status, Assigned);
    }

    #[test]
    fn test_visibility_predicate() {
        let restaurant_id = Uuid::new_v4();
        let driver_id = Uuid::new_v4();
        let order = order_for(restaurant_id, OrderStatus::Assigned, Some(driver_id));

        assert!(may_observe(&Principal::restaurant(restaurant_id), &order));
        assert!(!may_observe(&Principal::restaurant(Uuid::new_v4()), &order));
        assert!(may_observe(&Principal::driver(driver_id), &order));
        assert!(!may_observe(&Principal::driver(Uuid::new_v4()), &order));
        assert!(may_observe(&Principal::admin(Uuid::new_v4()), &order));
    }

    #[test]
    fn test_channel_naming() {
        let id = Uuid::new_v4();
        assert_eq!(
            channel_for(&Principal::driver(id)),
            format!("orders:driver:{id}")
        );
        assert_eq!(channel_for(&Principal::admin(id)), "orders:all");
    }
}
