//! Booking confirmation delivery.
//!
//! The engine hands a [`Confirmation`] to a [`Notifier`] after the booking is
//! committed. Delivery can fail; it never unwinds the booking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

/// Everything needed to tell a customer about their booking.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub booking_id: Ulid,
    pub tenant_id: Ulid,
    pub tenant_name: String,
    pub timezone: Tz,
    pub customer_name: String,
    pub customer_email: String,
    pub room_name: String,
    pub service_name: String,
    pub start: DateTime<Utc>,
    /// Includes the service buffer.
    pub end: DateTime<Utc>,
}

impl Confirmation {
    /// Subject line and plain-text body, times in the tenant's timezone.
    pub fn render(&self) -> (String, String) {
        let start = self.start.with_timezone(&self.timezone);
        let end = self.end.with_timezone(&self.timezone);
        let subject = format!("Booking confirmed: {} at {}", self.service_name, self.tenant_name);
        let body = format!(
            "Hi {},\n\n\
             Your booking at {} is confirmed.\n\n\
             Service: {}\n\
             Room: {}\n\
             Date: {}\n\
             Time: {} - {} ({})\n\n\
             Booking reference: {}\n",
            self.customer_name,
            self.tenant_name,
            self.service_name,
            self.room_name,
            start.format("%A %-d %B %Y"),
            start.format("%H:%M"),
            end.format("%H:%M"),
            self.timezone.name(),
            self.booking_id,
        );
        (subject, body)
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub sent: bool,
    pub error: Option<String>,
}

impl Delivery {
    pub fn sent() -> Self {
        Self {
            sent: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            sent: false,
            error: Some(error.into()),
        }
    }
}

/// Delivery channel for confirmations. Implementations report failure in the
/// returned [`Delivery`] and must not panic.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmation(&self, confirmation: &Confirmation) -> Delivery;
}

/// Used when no delivery channel is configured. Never sends.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

#[async_trait]
impl Notifier for Unconfigured {
    async fn send_confirmation(&self, _confirmation: &Confirmation) -> Delivery {
        Delivery::failed("notifier not configured")
    }
}

/// In-process broadcast of confirmations, per tenant and globally. A mail
/// worker subscribes and does the actual sending.
pub struct NotifyHub {
    tenants: DashMap<Ulid, broadcast::Sender<Confirmation>>,
    all: broadcast::Sender<Confirmation>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            tenants: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Confirmations for one tenant. Creates the channel if needed.
    pub fn subscribe(&self, tenant_id: Ulid) -> broadcast::Receiver<Confirmation> {
        let sender = self
            .tenants
            .entry(tenant_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Confirmations for every tenant.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Confirmation> {
        self.all.subscribe()
    }

    /// Drop a tenant's channel; its receivers see the channel close.
    pub fn remove(&self, tenant_id: &Ulid) {
        self.tenants.remove(tenant_id);
    }

    /// Number of receivers reached. Zero means nobody was listening.
    pub fn publish(&self, confirmation: &Confirmation) -> usize {
        let scoped = self
            .tenants
            .get(&confirmation.tenant_id)
            .and_then(|sender| sender.send(confirmation.clone()).ok())
            .unwrap_or(0);
        let global = self.all.send(confirmation.clone()).unwrap_or(0);
        scoped + global
    }
}

#[async_trait]
impl Notifier for NotifyHub {
    async fn send_confirmation(&self, confirmation: &Confirmation) -> Delivery {
        if self.publish(confirmation) == 0 {
            Delivery::failed("no subscribers")
        } else {
            Delivery::sent()
        }
    }
}
