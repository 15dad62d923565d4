//! Coordinator events.
//!
//! Events are emitted by the relayer on every accepted order transition and
//! pushed to subscribers whose [`EventFilter`] matches.

use serde::{Deserialize, Serialize};

use crate::{OrderId, Timestamp};

/// An event emitted by the coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Assigned by the event bus on emission; zero before.
    pub sequence: u64,
    pub event_type: EventType,
    pub order_id: Option<OrderId>,
    pub timestamp: Timestamp,
    /// Type-specific payload.
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(
        event_type: EventType,
        order_id: Option<OrderId>,
        timestamp: Timestamp,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            sequence: 0,
            event_type,
            order_id,
            timestamp,
            payload,
        }
    }

    pub fn category(&self) -> EventCategory {
        self.event_type.category()
    }
}

/// All coordinator event types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Order events
    OrderCreated,
    OrderClaimed,
    OrderReopened,
    OrderCompleted,
    OrderExpired,

    // Fill events
    FillRequested,
    MakerSigned,
    SourceEscrowCreated,
    DeploymentValidated,
    DeploymentRejected,
    FillAbandoned,

    // Settlement events
    SecretsProvided,
    GrantIssued,
    SecretsAuthorized,
    FillSettled,
}

impl EventType {
    pub fn category(self) -> EventCategory {
        match self {
            Self::OrderCreated
            | Self::OrderClaimed
            | Self::OrderReopened
            | Self::OrderCompleted
            | Self::OrderExpired => EventCategory::Order,
            Self::FillRequested
            | Self::MakerSigned
            | Self::SourceEscrowCreated
            | Self::DeploymentValidated
            | Self::DeploymentRejected
            | Self::FillAbandoned => EventCategory::Fill,
            Self::SecretsProvided
            | Self::GrantIssued
            | Self::SecretsAuthorized
            | Self::FillSettled => EventCategory::Settlement,
        }
    }
}

/// Coarse event grouping used by subscription filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Order,
    Fill,
    Settlement,
}

/// Filter for event subscriptions. Absent fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub categories: Option<Vec<EventCategory>>,
    #[serde(default)]
    pub order_ids: Option<Vec<OrderId>>,
}

impl EventFilter {
    /// Check if an event matches this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref categories) = self.categories {
            if !categories.contains(&event.category()) {
                return false;
            }
        }

        if let Some(ref order_ids) = self.order_ids {
            match event.order_id {
                Some(ref id) if order_ids.contains(id) => {}
                _ => return false,
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: EventType, order: u8) -> Event {
        Event::new(
            event_type,
            Some(OrderId::new([order; 32])),
            10,
            serde_json::Value::Null,
        )
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let filter = EventFilter::default();
        assert!(filter.matches(&event(EventType::OrderCreated, 1)));
        assert!(filter.matches(&event(EventType::FillSettled, 2)));
    }

    #[test]
    fn test_category_filter() {
        let filter = EventFilter {
            categories: Some(vec![EventCategory::Settlement]),
            order_ids: None,
        };
        assert!(filter.matches(&event(EventType::GrantIssued, 1)));
        assert!(!filter.matches(&event(EventType::MakerSigned, 1)));
    }

    #[test]
    fn test_order_filter() {
        let filter = EventFilter {
            categories: None,
            order_ids: Some(vec![OrderId::new([1; 32])]),
        };
        assert!(filter.matches(&event(EventType::OrderCreated, 1)));
        assert!(!filter.matches(&event(EventType::OrderCreated, 2)));

        let global = Event::new(EventType::OrderExpired, None, 0, serde_json::Value::Null);
        assert!(!filter.matches(&global));
    }

    #[test]
    fn test_event_type_wire_names() {
        let json = serde_json::to_string(&EventType::SecretsAuthorized).expect("serialize");
        assert_eq!(json, "\"secrets_authorized\"");
    }
}
