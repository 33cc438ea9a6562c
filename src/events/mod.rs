use crate::entities::OrderStatus;
use crate::notifications::{Notification, NotificationKind, NotificationSink};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Queues an event without waiting for room in the channel.
    ///
    /// A full or closed channel drops the event and reports why; callers have
    /// already committed their write and only log the failure.
    pub fn publish(&self, event: Event) -> Result<(), String> {
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) => {
                format!("event channel full, dropped {}", event.name())
            }
            TrySendError::Closed(event) => {
                format!("event channel closed, dropped {}", event.name())
            }
        })
    }
}

/// Domain events published by checkout, payment confirmation and dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        order_number: String,
        status: OrderStatus,
        total: Decimal,
        customer_name: String,
        phone: String,
        email: Option<String>,
    },
    OrderPaymentConfirmed {
        order_id: Uuid,
        order_number: String,
    },
    OrderShipped {
        order_id: Uuid,
        order_number: String,
        provider: String,
        tracking_number: String,
        phone: Option<String>,
    },
}

impl Event {
    pub fn order_id(&self) -> Uuid {
        match self {
            Event::OrderPlaced { order_id, .. }
            | Event::OrderPaymentConfirmed { order_id, .. }
            | Event::OrderShipped { order_id, .. } => *order_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderPlaced { .. } => "OrderPlaced",
            Event::OrderPaymentConfirmed { .. } => "OrderPaymentConfirmed",
            Event::OrderShipped { .. } => "OrderShipped",
        }
    }

    /// Customer-facing message for this event, if any.
    pub fn to_notification(&self) -> Option<Notification> {
        match self {
            Event::OrderPlaced {
                order_id,
                order_number,
                status,
                total,
                customer_name,
                phone,
                email,
            } => Some(Notification {
                kind: NotificationKind::OrderConfirmation,
                order_id: *order_id,
                order_number: order_number.clone(),
                phone: Some(phone.clone()),
                email: email.clone(),
                message: format!(
                    "Dear {}, your order {} ({}) has been received. Total payable: {}.",
                    customer_name, order_number, status, total
                ),
            }),
            Event::OrderPaymentConfirmed { .. } => None,
            Event::OrderShipped {
                order_id,
                order_number,
                provider,
                tracking_number,
                phone,
            } => Some(Notification {
                kind: NotificationKind::OrderShipped,
                order_id: *order_id,
                order_number: order_number.clone(),
                phone: phone.clone(),
                email: None,
                message: format!(
                    "Your order {} has been handed to {}. Tracking id: {}.",
                    order_number, provider, tracking_number
                ),
            }),
        }
    }
}

/// Drains the event channel, forwarding customer-facing events to the sink.
///
/// Sink failures are logged and dropped; the loop ends when every sender is gone.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, sink: Arc<dyn NotificationSink>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!(order_id = %event.order_id(), "Received event: {:?}", event);

        let Some(notification) = event.to_notification() else {
            continue;
        };

        if let Err(e) = sink.deliver(&notification).await {
            error!(
                order_id = %notification.order_id,
                "Failed to deliver notification: {}", e
            );
        }
    }

    warn!("Event channel closed; event processing loop stopped");
}
