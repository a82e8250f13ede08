use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

use super::{Store, StoreError};

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL. Appends that are already queued when the
/// first one arrives are written as one batch behind a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let first = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![first];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-buffered bytes never leak into
    // the next batch; every caller of this batch is told it failed.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Apply a booking event to its room (caller holds the room lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, booking_rooms: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingInserted { booking } => {
            booking_rooms.insert(booking.id, booking.room_id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingCanceled { id, .. } => {
            if let Some(b) = rs.booking_mut(*id) {
                b.status = BookingStatus::Canceled;
            }
        }
        _ => {}
    }
}

/// In-process store: concurrent maps for the catalog, one lock per room for
/// bookings. Optionally durable through a WAL replayed on open.
///
/// The room lock makes "check overlap, then insert" atomic, which is what
/// turns [`Store::insert_booking`] into an exclusion constraint.
///
/// Lock order: `writes`, then a room lock.
pub struct Ledger {
    tenants: DashMap<Ulid, Tenant>,
    slugs: DashMap<String, Ulid>,
    rooms: DashMap<Ulid, SharedRoomState>,
    services: DashMap<Ulid, Service>,
    rules: DashMap<Ulid, AvailabilityRule>,
    exceptions: DashMap<Ulid, AvailabilityException>,
    /// Reverse lookup: booking id → room id
    booking_rooms: DashMap<Ulid, Ulid>,
    /// Every mutation holds this shared from its checks until it is applied.
    /// Compaction and service deletion hold it exclusively.
    writes: RwLock<()>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Ledger {
    /// A ledger that forgets everything on drop.
    pub fn in_memory() -> Self {
        Self {
            tenants: DashMap::new(),
            slugs: DashMap::new(),
            rooms: DashMap::new(),
            services: DashMap::new(),
            rules: DashMap::new(),
            exceptions: DashMap::new(),
            booking_rooms: DashMap::new(),
            writes: RwLock::new(()),
            wal_tx: None,
        }
    }

    /// Replay the WAL at `path`, then keep appending to it. Spawns the WAL
    /// writer, so it must run inside a Tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let mut ledger = Self::in_memory();
        ledger.replay(&events);

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));
        ledger.wal_tx = Some(wal_tx);

        info!(path = %path.display(), events = events.len(), "ledger replayed");
        Ok(ledger)
    }

    pub fn is_durable(&self) -> bool {
        self.wal_tx.is_some()
    }

    fn replay(&self, events: &[Event]) {
        // Rooms are rebuilt unlocked, then published once replay is done.
        let mut rooms: HashMap<Ulid, RoomState> = HashMap::new();
        for event in events {
            match event {
                Event::RoomCreated { room } => {
                    rooms.insert(room.id, RoomState::new(room.clone()));
                }
                Event::RoomDeleted { id } => {
                    rooms.remove(id);
                    self.forget_room_scope(*id);
                }
                Event::BookingInserted { booking } => {
                    if let Some(rs) = rooms.get_mut(&booking.room_id) {
                        apply_to_room(rs, event, &self.booking_rooms);
                    }
                }
                Event::BookingCanceled { room_id, .. } => {
                    if let Some(rs) = rooms.get_mut(room_id) {
                        apply_to_room(rs, event, &self.booking_rooms);
                    }
                }
                other => self.apply_catalog(other),
            }
        }
        for (id, rs) in rooms {
            self.rooms.insert(id, Arc::new(RwLock::new(rs)));
        }
    }

    /// Apply a catalog event. Room and booking events are applied by the caller.
    fn apply_catalog(&self, event: &Event) {
        match event {
            Event::TenantCreated { tenant } => {
                self.slugs.insert(tenant.slug.clone(), tenant.id);
                self.tenants.insert(tenant.id, tenant.clone());
            }
            Event::TenantStatusChanged { id, status } => {
                if let Some(mut t) = self.tenants.get_mut(id) {
                    t.status = *status;
                }
            }
            Event::ServiceCreated { service } => {
                self.services.insert(service.id, service.clone());
            }
            Event::ServiceDeleted { id } => {
                self.services.remove(id);
            }
            Event::RuleAdded { rule } => {
                self.rules.insert(rule.id, rule.clone());
            }
            Event::RuleRemoved { id } => {
                self.rules.remove(id);
            }
            Event::ExceptionAdded { exception } => {
                self.exceptions.insert(exception.id, exception.clone());
            }
            Event::ExceptionRemoved { id } => {
                self.exceptions.remove(id);
            }
            Event::RoomCreated { .. }
            | Event::RoomDeleted { .. }
            | Event::BookingInserted { .. }
            | Event::BookingCanceled { .. } => {}
        }
    }

    /// Drop rules and exceptions scoped to a deleted room.
    fn forget_room_scope(&self, room_id: Ulid) {
        self.rules.retain(|_, r| r.room_id != Some(room_id));
        self.exceptions.retain(|_, e| e.room_id != Some(room_id));
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Persist then apply a catalog event.
    async fn commit_catalog(&self, event: Event) -> Result<(), StoreError> {
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        Ok(())
    }

    fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    fn room_handles(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    fn tenant_exists(&self, id: &Ulid) -> Result<(), StoreError> {
        if self.tenants.contains_key(id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(*id))
        }
    }

    /// Optional room scope of a rule or exception must name a room of the same tenant.
    async fn check_room_scope(&self, tenant_id: Ulid, room_id: Option<Ulid>) -> Result<(), StoreError> {
        if let Some(room_id) = room_id
            && self.room(tenant_id, room_id).await?.is_none()
        {
            return Err(StoreError::NotFound(room_id));
        }
        Ok(())
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    /// No-op for an in-memory ledger.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        // No write may land between the snapshot and the swap, or it would be
        // appended to the log the swap throws away.
        let _writes = self.writes.write().await;

        let mut events: Vec<Event> = self
            .tenants
            .iter()
            .map(|t| Event::TenantCreated {
                tenant: t.value().clone(),
            })
            .collect();
        let mut bookings = Vec::new();
        for rs in self.room_handles() {
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            bookings.extend(guard.bookings.iter().map(|b| Event::BookingInserted {
                booking: b.clone(),
            }));
        }
        events.extend(self.services.iter().map(|s| Event::ServiceCreated {
            service: s.value().clone(),
        }));
        events.extend(self.rules.iter().map(|r| Event::RuleAdded {
            rule: r.value().clone(),
        }));
        events.extend(self.exceptions.iter().map(|e| Event::ExceptionAdded {
            exception: e.value().clone(),
        }));
        events.extend(bookings);
        debug!(events = events.len(), "compacting ledger WAL");

        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl Store for Ledger {
    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StoreError> {
        let Some(id) = self.slugs.get(slug).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.tenants.get(&id).map(|t| t.value().clone()))
    }

    async fn tenant(&self, id: Ulid) -> Result<Option<Tenant>, StoreError> {
        Ok(self.tenants.get(&id).map(|t| t.value().clone()))
    }

    async fn room(&self, tenant_id: Ulid, room_id: Ulid) -> Result<Option<Room>, StoreError> {
        let Some(rs) = self.get_room(&room_id) else {
            return Ok(None);
        };
        let guard = rs.read().await;
        Ok((guard.room.tenant_id == tenant_id).then(|| guard.room.clone()))
    }

    async fn service(
        &self,
        tenant_id: Ulid,
        service_id: Ulid,
    ) -> Result<Option<Service>, StoreError> {
        Ok(self
            .services
            .get(&service_id)
            .filter(|s| s.tenant_id == tenant_id)
            .map(|s| s.value().clone()))
    }

    async fn rules(&self, tenant_id: Ulid) -> Result<Vec<AvailabilityRule>, StoreError> {
        let mut rules: Vec<AvailabilityRule> = self
            .rules
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.value().clone())
            .collect();
        // ULIDs sort by creation time.
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    async fn exceptions(
        &self,
        tenant_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilityException>, StoreError> {
        let mut exceptions: Vec<AvailabilityException> = self
            .exceptions
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.date >= from && e.date <= to)
            .map(|e| e.value().clone())
            .collect();
        exceptions.sort_by_key(|e| (e.date, e.id));
        Ok(exceptions)
    }

    async fn confirmed_bookings(
        &self,
        tenant_id: Ulid,
        room_id: Ulid,
        range: Span,
    ) -> Result<Vec<Span>, StoreError> {
        let Some(rs) = self.get_room(&room_id) else {
            return Ok(Vec::new());
        };
        let guard = rs.read().await;
        if guard.room.tenant_id != tenant_id {
            return Ok(Vec::new());
        }
        Ok(guard
            .confirmed_overlapping(&range)
            .map(Booking::span)
            .collect())
    }

    async fn bookings(&self, tenant_id: Ulid) -> Result<Vec<Booking>, StoreError> {
        let mut bookings = Vec::new();
        for rs in self.room_handles() {
            let guard = rs.read().await;
            if guard.room.tenant_id == tenant_id {
                bookings.extend(guard.bookings.iter().cloned());
            }
        }
        bookings.sort_by_key(|b| (b.start, b.id));
        Ok(bookings)
    }

    async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError> {
        let _writes = self.writes.read().await;
        let rs = self
            .get_room(&booking.room_id)
            .ok_or(StoreError::NotFound(booking.room_id))?;
        let mut guard = rs.write().await;
        // A concurrent delete_room removes the map entry while holding this lock.
        if !self.rooms.contains_key(&booking.room_id) || guard.room.tenant_id != booking.tenant_id
        {
            return Err(StoreError::NotFound(booking.room_id));
        }
        let service_live = self
            .services
            .get(&booking.service_id)
            .is_some_and(|s| s.tenant_id == booking.tenant_id);
        if !service_live {
            return Err(StoreError::NotFound(booking.service_id));
        }
        if self.booking_rooms.contains_key(&booking.id) {
            return Err(StoreError::AlreadyExists(booking.id.to_string()));
        }
        if booking.is_confirmed()
            && let Some(existing) = guard.confirmed_overlapping(&booking.span()).next()
        {
            return Err(StoreError::Overlap(existing.id));
        }

        let event = Event::BookingInserted { booking };
        self.wal_append(&event).await?;
        apply_to_room(&mut guard, &event, &self.booking_rooms);
        Ok(())
    }

    async fn cancel_booking(
        &self,
        tenant_id: Ulid,
        booking_id: Ulid,
    ) -> Result<Option<BookingStatus>, StoreError> {
        let _writes = self.writes.read().await;
        let Some(room_id) = self.booking_rooms.get(&booking_id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let Some(rs) = self.get_room(&room_id) else {
            return Ok(None);
        };
        let mut guard = rs.write().await;
        let Some(previous) = guard
            .bookings
            .iter()
            .find(|b| b.id == booking_id && b.tenant_id == tenant_id)
            .map(|b| b.status)
        else {
            return Ok(None);
        };

        if previous == BookingStatus::Confirmed {
            let event = Event::BookingCanceled {
                id: booking_id,
                room_id,
            };
            self.wal_append(&event).await?;
            apply_to_room(&mut guard, &event, &self.booking_rooms);
        }
        Ok(Some(previous))
    }

    async fn insert_tenant(&self, tenant: Tenant) -> Result<(), StoreError> {
        let _writes = self.writes.read().await;
        if self.tenants.contains_key(&tenant.id) {
            return Err(StoreError::AlreadyExists(tenant.id.to_string()));
        }
        // Reserve the slug before the WAL round trip so two registrations cannot both win.
        match self.slugs.entry(tenant.slug.clone()) {
            Entry::Occupied(_) => return Err(StoreError::AlreadyExists(tenant.slug)),
            Entry::Vacant(v) => {
                v.insert(tenant.id);
            }
        }
        let slug = tenant.slug.clone();
        if let Err(e) = self.commit_catalog(Event::TenantCreated { tenant }).await {
            self.slugs.remove(&slug);
            return Err(e);
        }
        Ok(())
    }

    async fn set_tenant_status(&self, id: Ulid, status: TenantStatus) -> Result<(), StoreError> {
        let _writes = self.writes.read().await;
        self.tenant_exists(&id)?;
        self.commit_catalog(Event::TenantStatusChanged { id, status })
            .await
    }

    async fn insert_room(&self, room: Room) -> Result<(), StoreError> {
        let _writes = self.writes.read().await;
        self.tenant_exists(&room.tenant_id)?;
        let event = Event::RoomCreated { room: room.clone() };
        match self.rooms.entry(room.id) {
            Entry::Occupied(_) => return Err(StoreError::AlreadyExists(room.id.to_string())),
            Entry::Vacant(v) => {
                v.insert(Arc::new(RwLock::new(RoomState::new(room.clone()))));
            }
        }
        if let Err(e) = self.wal_append(&event).await {
            self.rooms.remove(&room.id);
            return Err(e);
        }
        Ok(())
    }

    async fn delete_room(&self, tenant_id: Ulid, room_id: Ulid) -> Result<bool, StoreError> {
        let _writes = self.writes.read().await;
        let Some(rs) = self.get_room(&room_id) else {
            return Ok(false);
        };
        let guard = rs.write().await;
        if guard.room.tenant_id != tenant_id || !self.rooms.contains_key(&room_id) {
            return Ok(false);
        }
        if !guard.bookings.is_empty() {
            return Err(StoreError::InUse(room_id));
        }
        self.wal_append(&Event::RoomDeleted { id: room_id }).await?;
        self.rooms.remove(&room_id);
        self.forget_room_scope(room_id);
        Ok(true)
    }

    async fn insert_service(&self, service: Service) -> Result<(), StoreError> {
        if service.duration_minutes == 0 || service.duration_minutes > MAX_SERVICE_MINUTES {
            return Err(StoreError::LimitExceeded("service duration out of range"));
        }
        if service.buffer_minutes > MAX_BUFFER_MINUTES {
            return Err(StoreError::LimitExceeded("service buffer out of range"));
        }
        let _writes = self.writes.read().await;
        self.tenant_exists(&service.tenant_id)?;
        if self.services.contains_key(&service.id) {
            return Err(StoreError::AlreadyExists(service.id.to_string()));
        }
        self.commit_catalog(Event::ServiceCreated { service }).await
    }

    /// Exclusive: no booking can land between the scan and the delete.
    async fn delete_service(&self, tenant_id: Ulid, service_id: Ulid) -> Result<bool, StoreError> {
        let _writes = self.writes.write().await;
        if self.service(tenant_id, service_id).await?.is_none() {
            return Ok(false);
        }
        for rs in self.room_handles() {
            let guard = rs.read().await;
            if guard.bookings.iter().any(|b| b.service_id == service_id) {
                return Err(StoreError::InUse(service_id));
            }
        }
        self.commit_catalog(Event::ServiceDeleted { id: service_id })
            .await?;
        Ok(true)
    }

    async fn insert_rule(&self, rule: AvailabilityRule) -> Result<(), StoreError> {
        let _writes = self.writes.read().await;
        self.tenant_exists(&rule.tenant_id)?;
        self.check_room_scope(rule.tenant_id, rule.room_id).await?;
        let count = self
            .rules
            .iter()
            .filter(|r| r.tenant_id == rule.tenant_id)
            .count();
        if count >= MAX_RULES_PER_TENANT {
            return Err(StoreError::LimitExceeded("too many availability rules"));
        }
        self.commit_catalog(Event::RuleAdded { rule }).await
    }

    async fn delete_rule(&self, tenant_id: Ulid, rule_id: Ulid) -> Result<bool, StoreError> {
        let _writes = self.writes.read().await;
        let owned = self
            .rules
            .get(&rule_id)
            .is_some_and(|r| r.tenant_id == tenant_id);
        if !owned {
            return Ok(false);
        }
        self.commit_catalog(Event::RuleRemoved { id: rule_id }).await?;
        Ok(true)
    }

    async fn insert_exception(&self, exception: AvailabilityException) -> Result<(), StoreError> {
        let _writes = self.writes.read().await;
        self.tenant_exists(&exception.tenant_id)?;
        self.check_room_scope(exception.tenant_id, exception.room_id)
            .await?;
        let count = self
            .exceptions
            .iter()
            .filter(|e| e.tenant_id == exception.tenant_id)
            .count();
        if count >= MAX_EXCEPTIONS_PER_TENANT {
            return Err(StoreError::LimitExceeded("too many availability exceptions"));
        }
        self.commit_catalog(Event::ExceptionAdded { exception })
            .await
    }

    async fn delete_exception(
        &self,
        tenant_id: Ulid,
        exception_id: Ulid,
    ) -> Result<bool, StoreError> {
        let _writes = self.writes.read().await;
        let owned = self
            .exceptions
            .get(&exception_id)
            .is_some_and(|e| e.tenant_id == tenant_id);
        if !owned {
            return Ok(false);
        }
        self.commit_catalog(Event::ExceptionRemoved { id: exception_id })
            .await?;
        Ok(true)
    }
}
