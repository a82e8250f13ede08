use chrono::{DateTime, Days, NaiveTime, Utc};
use ulid::Ulid;

use crate::model::*;
use crate::observability::{SLOTS_RETURNED, SLOT_QUERIES_TOTAL};
use crate::tenant::BookingScope;
use crate::validate::SlotQuery;

use super::availability::{generate_slots, local_instant};
use super::{Engine, EngineError, Entity};

impl Engine {
    /// Slots from tenant-local midnight today through the query's horizon.
    pub async fn available_slots(&self, query: &SlotQuery) -> Result<Vec<Slot>, EngineError> {
        self.available_slots_at(query, Utc::now()).await
    }

    /// [`Engine::available_slots`] with "now" supplied by the caller.
    pub async fn available_slots_at(
        &self,
        query: &SlotQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<Slot>, EngineError> {
        let result = self.slots_from(query, now).await;
        match &result {
            Ok(slots) => {
                metrics::counter!(SLOT_QUERIES_TOTAL, "status" => "ok").increment(1);
                metrics::histogram!(SLOTS_RETURNED).record(slots.len() as f64);
            }
            Err(e) => {
                metrics::counter!(SLOT_QUERIES_TOTAL, "status" => e.label()).increment(1);
            }
        }
        result
    }

    async fn slots_from(
        &self,
        query: &SlotQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<Slot>, EngineError> {
        let query = query.validate()?;
        let scope = self
            .resolve_booking_scope(&query.tenant_slug, query.room_id, query.service_id)
            .await?;

        let days = self.config.horizon_days(query.days);
        let today = now.with_timezone(&scope.tz).date_naive();
        let last = today
            .checked_add_days(Days::new(u64::from(days)))
            .ok_or(EngineError::LimitExceeded("horizon past the supported calendar"))?;
        let range = Span::new(
            local_instant(scope.tz, today, NaiveTime::MIN),
            local_instant(scope.tz, last, NaiveTime::MIN),
        );
        self.slots_between(&scope, range).await
    }

    /// Slots for an already resolved scope over an explicit range.
    pub async fn slots_between(
        &self,
        scope: &BookingScope,
        range: Span,
    ) -> Result<Vec<Slot>, EngineError> {
        let tenant_id = scope.tenant.id;
        let first = range.start.with_timezone(&scope.tz).date_naive();
        let last = range.end.with_timezone(&scope.tz).date_naive();
        // A candidate's buffer may reach past the range end.
        let occupied_range = Span::new(range.start, range.end + scope.service.buffer());

        let (rules, exceptions, occupied) = futures::try_join!(
            self.store.rules(tenant_id),
            self.store.exceptions(tenant_id, first, last),
            self.store
                .confirmed_bookings(tenant_id, scope.room.id, occupied_range),
        )?;

        Ok(generate_slots(
            scope.tz,
            scope.room.id,
            &scope.service,
            &rules,
            &exceptions,
            &occupied,
            range,
        ))
    }

    /// Every booking of the tenant, any status, ordered by start.
    pub async fn list_bookings(&self, tenant_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        self.store
            .tenant(tenant_id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Tenant))?;
        Ok(self.store.bookings(tenant_id).await?)
    }

    pub async fn list_rules(&self, tenant_id: Ulid) -> Result<Vec<AvailabilityRule>, EngineError> {
        self.store
            .tenant(tenant_id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Tenant))?;
        Ok(self.store.rules(tenant_id).await?)
    }
}
