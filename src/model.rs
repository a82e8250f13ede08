use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open interval `[start, end)` of absolute instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Span {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Ulid,
    pub slug: String,
    pub name: String,
    /// IANA name. Parsed on use by `tenant::resolve_timezone`.
    pub timezone: Option<String>,
    pub status: TenantStatus,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub name: String,
    pub bookable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub name: String,
    pub duration_minutes: u32,
    /// Turnaround time after each appointment. Enforced, never shown to customers.
    pub buffer_minutes: u32,
    pub published: bool,
    /// Minor currency units.
    pub price: i64,
}

impl Service {
    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn buffer(&self) -> Duration {
        Duration::minutes(i64::from(self.buffer_minutes))
    }

    /// Duration plus buffer: how long a booking keeps the room.
    pub fn occupancy(&self) -> Duration {
        self.duration() + self.buffer()
    }
}

/// Weekly recurring opening. `room_id = None` applies to every room of the tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub room_id: Option<Ulid>,
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl AvailabilityRule {
    pub fn applies_to(&self, room_id: Ulid, day_of_week: u8) -> bool {
        self.day_of_week == day_of_week && self.room_id.is_none_or(|r| r == room_id)
    }
}

/// One-off override for a single calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityException {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub room_id: Option<Ulid>,
    pub date: NaiveDate,
    pub is_closed: bool,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
}

impl AvailabilityException {
    pub fn applies_to(&self, room_id: Ulid, date: NaiveDate) -> bool {
        self.date == date && self.room_id.is_none_or(|r| r == room_id)
    }

    /// Closed with no time range: the whole day is shut.
    pub fn closes_whole_day(&self) -> bool {
        self.is_closed && self.start_time.is_none() && self.end_time.is_none()
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub room_id: Ulid,
    pub service_id: Ulid,
    pub start: DateTime<Utc>,
    /// `start + duration + buffer`.
    pub end: DateTime<Utc>,
    pub customer: Customer,
    pub notes: Option<String>,
    pub status: BookingStatus,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }
}

/// A bookable candidate. `end` excludes the service buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A room with all of its bookings, the unit of locking in the ledger.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Every booking ever made for the room, sorted by `start`.
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.start, |b| b.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings (any status) whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.end > query.start)
    }

    pub fn confirmed_overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        self.overlapping(query).filter(|b| b.is_confirmed())
    }
}

/// Store mutations, flat. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TenantCreated { tenant: Tenant },
    TenantStatusChanged { id: Ulid, status: TenantStatus },
    RoomCreated { room: Room },
    RoomDeleted { id: Ulid },
    ServiceCreated { service: Service },
    ServiceDeleted { id: Ulid },
    RuleAdded { rule: AvailabilityRule },
    RuleRemoved { id: Ulid },
    ExceptionAdded { exception: AvailabilityException },
    ExceptionRemoved { id: Ulid },
    BookingInserted { booking: Booking },
    BookingCanceled { id: Ulid, room_id: Ulid },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn booking(start: DateTime<Utc>, end: DateTime<Utc>, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            tenant_id: Ulid::new(),
            room_id: Ulid::new(),
            service_id: Ulid::new(),
            start,
            end,
            customer: Customer {
                name: "Ana".into(),
                email: "ana@example.com".into(),
                phone: None,
            },
            notes: None,
            status,
        }
    }

    fn room_state() -> RoomState {
        RoomState::new(Room {
            id: Ulid::new(),
            tenant_id: Ulid::new(),
            name: "Sala A".into(),
            bookable: true,
        })
    }

    #[test]
    fn span_basics() {
        let s = Span::new(at(10, 0), at(11, 0));
        assert_eq!(s.duration(), Duration::hours(1));
        assert!(s.contains_instant(at(10, 0)));
        assert!(s.contains_instant(at(10, 59)));
        assert!(!s.contains_instant(at(11, 0))); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(at(10, 0), at(11, 0));
        let b = Span::new(at(10, 30), at(11, 30));
        let c = Span::new(at(11, 0), at(12, 0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(at(9, 0), at(17, 0));
        assert!(outer.contains_span(&Span::new(at(10, 0), at(11, 0))));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&Span::new(at(8, 0), at(10, 0))));
    }

    #[test]
    fn service_occupancy_adds_buffer() {
        let service = Service {
            id: Ulid::new(),
            tenant_id: Ulid::new(),
            name: "Ensayo".into(),
            duration_minutes: 60,
            buffer_minutes: 15,
            published: true,
            price: 15_000,
        };
        assert_eq!(service.occupancy(), Duration::minutes(75));
    }

    #[test]
    fn rule_applies_to_room_scope() {
        let room = Ulid::new();
        let mut rule = AvailabilityRule {
            id: Ulid::new(),
            tenant_id: Ulid::new(),
            room_id: None,
            day_of_week: 1,
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
        };
        assert!(rule.applies_to(room, 1));
        assert!(!rule.applies_to(room, 2));
        rule.room_id = Some(Ulid::new());
        assert!(!rule.applies_to(room, 1));
        rule.room_id = Some(room);
        assert!(rule.applies_to(room, 1));
    }

    #[test]
    fn bookings_kept_sorted() {
        let mut rs = room_state();
        rs.insert_booking(booking(at(14, 0), at(15, 0), BookingStatus::Confirmed));
        rs.insert_booking(booking(at(10, 0), at(11, 0), BookingStatus::Confirmed));
        rs.insert_booking(booking(at(12, 0), at(13, 0), BookingStatus::Canceled));
        let starts: Vec<_> = rs.bookings.iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![at(10, 0), at(12, 0), at(14, 0)]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = room_state();
        rs.insert_booking(booking(at(8, 0), at(9, 0), BookingStatus::Confirmed));
        rs.insert_booking(booking(at(10, 30), at(11, 30), BookingStatus::Confirmed));
        rs.insert_booking(booking(at(15, 0), at(16, 0), BookingStatus::Confirmed));

        let query = Span::new(at(11, 0), at(14, 0));
        let hits: Vec<_> = rs.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].start, at(10, 30));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = room_state();
        rs.insert_booking(booking(at(10, 0), at(11, 0), BookingStatus::Confirmed));
        let query = Span::new(at(11, 0), at(12, 0));
        assert_eq!(rs.overlapping(&query).count(), 0);
    }

    #[test]
    fn confirmed_overlapping_ignores_canceled() {
        let mut rs = room_state();
        rs.insert_booking(booking(at(10, 0), at(11, 0), BookingStatus::Canceled));
        let query = Span::new(at(10, 0), at(11, 0));
        assert_eq!(rs.overlapping(&query).count(), 1);
        assert_eq!(rs.confirmed_overlapping(&query).count(), 0);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingInserted {
            booking: booking(at(10, 0), at(11, 15), BookingStatus::Confirmed),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
