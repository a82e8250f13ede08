//! Persistence boundary.
//!
//! The scheduling core only talks to [`Store`]. Every read is tenant scoped: a
//! record owned by another tenant is reported exactly like a missing one.
//! [`Ledger`] is the in-process implementation shipped with the crate.

mod ledger;

pub use ledger::Ledger;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Exclusion constraint: the booking overlaps a confirmed booking of the same room.
    #[error("overlaps confirmed booking {0}")]
    Overlap(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("{0} is referenced by bookings")]
    InUse(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    // ── Read model ───────────────────────────────────────────

    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StoreError>;

    async fn tenant(&self, id: Ulid) -> Result<Option<Tenant>, StoreError>;

    async fn room(&self, tenant_id: Ulid, room_id: Ulid) -> Result<Option<Room>, StoreError>;

    async fn service(
        &self,
        tenant_id: Ulid,
        service_id: Ulid,
    ) -> Result<Option<Service>, StoreError>;

    async fn rules(&self, tenant_id: Ulid) -> Result<Vec<AvailabilityRule>, StoreError>;

    /// Exceptions dated within `[from, to]`, both inclusive.
    async fn exceptions(
        &self,
        tenant_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilityException>, StoreError>;

    /// Occupied spans of confirmed bookings of `room_id` overlapping `range`.
    async fn confirmed_bookings(
        &self,
        tenant_id: Ulid,
        room_id: Ulid,
        range: Span,
    ) -> Result<Vec<Span>, StoreError>;

    /// All bookings of the tenant, any status, ordered by start.
    async fn bookings(&self, tenant_id: Ulid) -> Result<Vec<Booking>, StoreError>;

    // ── Booking writes ───────────────────────────────────────

    /// Must reject with [`StoreError::Overlap`] when a confirmed booking of the
    /// same room overlaps. This is the final authority on double booking.
    async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError>;

    /// Mark a booking canceled. Returns the status it had before the call, or
    /// `None` when the tenant has no such booking. Canceled stays canceled.
    async fn cancel_booking(
        &self,
        tenant_id: Ulid,
        booking_id: Ulid,
    ) -> Result<Option<BookingStatus>, StoreError>;

    // ── Catalog writes ───────────────────────────────────────

    async fn insert_tenant(&self, tenant: Tenant) -> Result<(), StoreError>;

    async fn set_tenant_status(&self, id: Ulid, status: TenantStatus) -> Result<(), StoreError>;

    async fn insert_room(&self, room: Room) -> Result<(), StoreError>;

    /// `Ok(false)` when the tenant has no such room.
    async fn delete_room(&self, tenant_id: Ulid, room_id: Ulid) -> Result<bool, StoreError>;

    async fn insert_service(&self, service: Service) -> Result<(), StoreError>;

    async fn delete_service(&self, tenant_id: Ulid, service_id: Ulid) -> Result<bool, StoreError>;

    async fn insert_rule(&self, rule: AvailabilityRule) -> Result<(), StoreError>;

    async fn delete_rule(&self, tenant_id: Ulid, rule_id: Ulid) -> Result<bool, StoreError>;

    async fn insert_exception(&self, exception: AvailabilityException) -> Result<(), StoreError>;

    async fn delete_exception(&self, tenant_id: Ulid, exception_id: Ulid)
    -> Result<bool, StoreError>;
}
