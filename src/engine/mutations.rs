use std::time::Instant;

use tracing::{Instrument, error, info, info_span, warn};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Confirmation, Delivery};
use crate::observability::{
    BOOKINGS_TOTAL, CANCELLATIONS_TOTAL, COMMIT_DURATION_SECONDS, NOTIFICATIONS_TOTAL,
};
use crate::store::StoreError;
use crate::tenant::BookingScope;
use crate::validate::{BookingRequest, NewException, NewRule, NewService, check_name};

use super::{BookingReceipt, CancelOutcome, CommitStage, Engine, EngineError, Entity};

impl Engine {
    // ── Booking commit ───────────────────────────────────────

    /// Validate, resolve, conflict-check, insert, then notify. A failed or
    /// timed-out notification is reported in the receipt, never as an error.
    pub async fn commit_booking(
        &self,
        request: &BookingRequest,
    ) -> Result<BookingReceipt, EngineError> {
        let started = Instant::now();
        let span = info_span!(
            "commit_booking",
            tenant = %request.tenant_slug.trim(),
            room = %request.room_id.trim(),
            service = %request.service_id.trim(),
        );
        let result = self.commit(request).instrument(span).await;

        let outcome = match &result {
            Ok(_) => "confirmed",
            Err(e) => e.label(),
        };
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(COMMIT_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    async fn commit(&self, request: &BookingRequest) -> Result<BookingReceipt, EngineError> {
        let mut stage = CommitStage::Validating;

        let valid = request.validate()?;
        let scope = self
            .resolve_booking_scope(&valid.tenant_slug, valid.room_id, valid.service_id)
            .await?;

        let end = valid.start + scope.service.occupancy();
        let occupancy = Span::new(valid.start, end);
        if self
            .check_conflict(scope.tenant.id, scope.room.id, occupancy)
            .await?
        {
            info!(start = %valid.start, "slot taken");
            return Err(EngineError::Conflict);
        }
        stage.advance(CommitStage::ConflictChecked);

        let booking = Booking {
            id: Ulid::new(),
            tenant_id: scope.tenant.id,
            room_id: scope.room.id,
            service_id: scope.service.id,
            start: valid.start,
            end,
            customer: valid.customer,
            notes: valid.notes,
            status: BookingStatus::Confirmed,
        };
        self.store
            .insert_booking(booking.clone())
            .await
            .map_err(|e| match e {
                StoreError::Overlap(existing) => {
                    warn!(%existing, "slot taken between check and insert");
                    EngineError::Conflict
                }
                // Room or service deleted after it was resolved.
                StoreError::NotFound(id) if id == scope.service.id => {
                    EngineError::NotFound(Entity::Service)
                }
                StoreError::NotFound(_) => EngineError::NotFound(Entity::Room),
                other => {
                    error!(error = %other, "booking insert failed");
                    EngineError::Store(other)
                }
            })?;
        stage.advance(CommitStage::Inserted);
        info!(booking = %booking.id, start = %booking.start, "booking confirmed");

        let email_sent = self.send_confirmation(&scope, &booking).await;
        stage.advance(CommitStage::NotificationAttempted);

        let receipt = BookingReceipt {
            id: booking.id,
            start: booking.start,
            end: booking.end,
            room_name: scope.room.name,
            service_name: scope.service.name,
            email_sent,
        };
        stage.advance(CommitStage::Done);
        Ok(receipt)
    }

    /// Bounded by `config.notify_timeout`. The notifier runs on its own task so
    /// a panic inside it is contained.
    async fn send_confirmation(&self, scope: &BookingScope, booking: &Booking) -> bool {
        let confirmation = Confirmation {
            booking_id: booking.id,
            tenant_id: scope.tenant.id,
            tenant_name: scope.tenant.name.clone(),
            timezone: scope.tz,
            customer_name: booking.customer.name.clone(),
            customer_email: booking.customer.email.clone(),
            room_name: scope.room.name.clone(),
            service_name: scope.service.name.clone(),
            start: booking.start,
            end: booking.end,
        };

        let notifier = self.notifier.clone();
        let mut task =
            tokio::spawn(async move { notifier.send_confirmation(&confirmation).await });
        let timeout = self.config.notify_timeout;
        let delivery = match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(delivery)) => delivery,
            Ok(Err(join_err)) => Delivery::failed(format!("notifier task failed: {join_err}")),
            Err(_) => {
                task.abort();
                Delivery::failed(format!("timed out after {}ms", timeout.as_millis()))
            }
        };

        let status = if delivery.sent { "sent" } else { "failed" };
        metrics::counter!(NOTIFICATIONS_TOTAL, "status" => status).increment(1);
        if !delivery.sent {
            warn!(
                booking = %booking.id,
                error = delivery.error.as_deref().unwrap_or("unknown"),
                "confirmation not sent"
            );
        }
        delivery.sent
    }

    // ── Cancellation ─────────────────────────────────────────

    /// Confirmed -> canceled. Canceling twice is not an error.
    pub async fn cancel_booking(
        &self,
        tenant_id: Ulid,
        booking_id: Ulid,
    ) -> Result<CancelOutcome, EngineError> {
        match self.store.cancel_booking(tenant_id, booking_id).await? {
            None => Err(EngineError::NotFound(Entity::Booking)),
            Some(BookingStatus::Confirmed) => {
                metrics::counter!(CANCELLATIONS_TOTAL).increment(1);
                info!(tenant = %tenant_id, booking = %booking_id, "booking canceled");
                Ok(CancelOutcome::Canceled)
            }
            Some(BookingStatus::Canceled) => Ok(CancelOutcome::AlreadyCanceled),
        }
    }

    // ── Catalog ──────────────────────────────────────────────

    async fn require_tenant(&self, tenant_id: Ulid) -> Result<(), EngineError> {
        self.store
            .tenant(tenant_id)
            .await?
            .map(|_| ())
            .ok_or(EngineError::NotFound(Entity::Tenant))
    }

    pub async fn add_room(
        &self,
        tenant_id: Ulid,
        name: &str,
        bookable: bool,
    ) -> Result<Room, EngineError> {
        let name = check_name("name", name)?;
        self.require_tenant(tenant_id).await?;
        let room = Room {
            id: Ulid::new(),
            tenant_id,
            name,
            bookable,
        };
        self.store
            .insert_room(room.clone())
            .await
            .map_err(|e| not_found_as(e, Entity::Tenant))?;
        info!(tenant = %tenant_id, room = %room.id, "room added");
        Ok(room)
    }

    /// Rejected with `InUse` while any booking, of any status, references the room.
    pub async fn remove_room(&self, tenant_id: Ulid, room_id: Ulid) -> Result<(), EngineError> {
        match self.store.delete_room(tenant_id, room_id).await {
            Ok(true) => {
                info!(tenant = %tenant_id, room = %room_id, "room removed");
                Ok(())
            }
            Ok(false) => Err(EngineError::NotFound(Entity::Room)),
            Err(StoreError::InUse(_)) => Err(EngineError::InUse(Entity::Room)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn add_service(
        &self,
        tenant_id: Ulid,
        input: &NewService,
    ) -> Result<Service, EngineError> {
        input.validate()?;
        self.require_tenant(tenant_id).await?;
        let service = Service {
            id: Ulid::new(),
            tenant_id,
            name: input.name.trim().to_string(),
            duration_minutes: input.duration_minutes,
            buffer_minutes: input.buffer_minutes,
            published: input.published,
            price: input.price,
        };
        self.store
            .insert_service(service.clone())
            .await
            .map_err(|e| not_found_as(e, Entity::Tenant))?;
        info!(tenant = %tenant_id, service = %service.id, "service added");
        Ok(service)
    }

    pub async fn remove_service(
        &self,
        tenant_id: Ulid,
        service_id: Ulid,
    ) -> Result<(), EngineError> {
        match self.store.delete_service(tenant_id, service_id).await {
            Ok(true) => {
                info!(tenant = %tenant_id, service = %service_id, "service removed");
                Ok(())
            }
            Ok(false) => Err(EngineError::NotFound(Entity::Service)),
            Err(StoreError::InUse(_)) => Err(EngineError::InUse(Entity::Service)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn add_rule(
        &self,
        tenant_id: Ulid,
        input: &NewRule,
    ) -> Result<AvailabilityRule, EngineError> {
        input.validate()?;
        self.require_tenant(tenant_id).await?;
        let rule = AvailabilityRule {
            id: Ulid::new(),
            tenant_id,
            room_id: input.room_id,
            day_of_week: input.day_of_week,
            start_time: input.start_time,
            end_time: input.end_time,
        };
        // Tenant exists, so a missing record can only be the room scope.
        self.store
            .insert_rule(rule.clone())
            .await
            .map_err(|e| not_found_as(e, Entity::Room))?;
        Ok(rule)
    }

    pub async fn remove_rule(&self, tenant_id: Ulid, rule_id: Ulid) -> Result<(), EngineError> {
        if self.store.delete_rule(tenant_id, rule_id).await? {
            Ok(())
        } else {
            Err(EngineError::NotFound(Entity::Rule))
        }
    }

    pub async fn add_exception(
        &self,
        tenant_id: Ulid,
        input: &NewException,
    ) -> Result<AvailabilityException, EngineError> {
        input.validate()?;
        self.require_tenant(tenant_id).await?;
        let exception = AvailabilityException {
            id: Ulid::new(),
            tenant_id,
            room_id: input.room_id,
            date: input.date,
            is_closed: input.is_closed,
            start_time: input.start_time,
            end_time: input.end_time,
        };
        self.store
            .insert_exception(exception.clone())
            .await
            .map_err(|e| not_found_as(e, Entity::Room))?;
        Ok(exception)
    }

    pub async fn remove_exception(
        &self,
        tenant_id: Ulid,
        exception_id: Ulid,
    ) -> Result<(), EngineError> {
        if self.store.delete_exception(tenant_id, exception_id).await? {
            Ok(())
        } else {
            Err(EngineError::NotFound(Entity::Exception))
        }
    }
}

fn not_found_as(e: StoreError, entity: Entity) -> EngineError {
    match e {
        StoreError::NotFound(_) => EngineError::NotFound(entity),
        other => other.into(),
    }
}
