mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{
    dates_between, generate_slots, local_instant, merge_overlapping, resolve_windows,
    subtract_intervals, weekday_index,
};
pub use conflict::has_conflict;
pub use error::{EngineError, Entity, FieldError, Rejection};

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use ulid::Ulid;

use crate::config::Config;
use crate::notify::Notifier;
use crate::store::Store;

/// Scheduling core. Holds no request state; share it behind an `Arc`.
pub struct Engine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) config: Config,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, config: Config) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}

/// Booking commit progress. Rejections leave from `Validating` (bad input,
/// unknown or ineligible records) or `ConflictChecked` (slot taken); nothing
/// after `Inserted` can fail the booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStage {
    Validating,
    ConflictChecked,
    Inserted,
    NotificationAttempted,
    Done,
}

impl CommitStage {
    pub fn as_str(self) -> &'static str {
        match self {
            CommitStage::Validating => "validating",
            CommitStage::ConflictChecked => "conflict_checked",
            CommitStage::Inserted => "inserted",
            CommitStage::NotificationAttempted => "notification_attempted",
            CommitStage::Done => "done",
        }
    }

    pub(crate) fn advance(&mut self, next: CommitStage) {
        debug!(from = self.as_str(), to = next.as_str(), "commit stage");
        *self = next;
    }
}

impl fmt::Display for CommitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the customer gets back from a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingReceipt {
    pub id: Ulid,
    pub start: DateTime<Utc>,
    /// Includes the service buffer.
    pub end: DateTime<Utc>,
    pub room_name: String,
    pub service_name: String,
    pub email_sent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Canceled,
    /// Already canceled before this call. Nothing was written.
    AlreadyCanceled,
}
