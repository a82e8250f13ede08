//! Request shape validation. Everything here is pure: no store access, and a
//! rejected request never reaches the engine's lookups.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::{EngineError, FieldError};
use crate::limits::*;
use crate::model::Customer;

/// Raw booking submission, as posted by a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookingRequest {
    pub tenant_slug: String,
    pub room_id: String,
    pub service_id: String,
    /// RFC 3339 instant.
    pub start_at: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub notes: Option<String>,
}

/// A booking request whose shape has been checked. Eligibility of the tenant,
/// room and service is still unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBooking {
    pub tenant_slug: String,
    pub room_id: Ulid,
    pub service_id: Ulid,
    pub start: DateTime<Utc>,
    pub customer: Customer,
    pub notes: Option<String>,
}

impl BookingRequest {
    pub fn from_json(body: &str) -> Result<Self, EngineError> {
        serde_json::from_str(body)
            .map_err(|e| EngineError::invalid("body", format!("malformed JSON: {e}")))
    }

    /// Check every field and report all failures at once.
    pub fn validate(&self) -> Result<ValidatedBooking, EngineError> {
        let mut errors = Vec::new();

        let tenant_slug = self.tenant_slug.trim();
        if tenant_slug.is_empty() {
            errors.push(FieldError::new("tenantSlug", "is required"));
        }
        let room_id = parse_id("roomId", &self.room_id, &mut errors);
        let service_id = parse_id("serviceId", &self.service_id, &mut errors);
        let start = parse_instant("startAt", &self.start_at, &mut errors);

        let name = self.customer_name.trim();
        if name.is_empty() {
            errors.push(FieldError::new("customerName", "is required"));
        } else if name.len() > MAX_NAME_LEN {
            errors.push(FieldError::new("customerName", "is too long"));
        }

        let email = self.customer_email.trim();
        if email.is_empty() {
            errors.push(FieldError::new("customerEmail", "is required"));
        } else if !is_valid_email(email) {
            errors.push(FieldError::new("customerEmail", "is not a valid email"));
        }

        let phone = optional_text(self.customer_phone.as_deref());
        if phone.is_some_and(|p| p.len() > MAX_PHONE_LEN) {
            errors.push(FieldError::new("customerPhone", "is too long"));
        }
        let notes = optional_text(self.notes.as_deref());
        if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
            errors.push(FieldError::new("notes", "is too long"));
        }

        match (room_id, service_id, start) {
            (Some(room_id), Some(service_id), Some(start)) if errors.is_empty() => {
                Ok(ValidatedBooking {
                    tenant_slug: tenant_slug.to_string(),
                    room_id,
                    service_id,
                    start,
                    customer: Customer {
                        name: name.to_string(),
                        email: email.to_string(),
                        phone: phone.map(str::to_string),
                    },
                    notes: notes.map(str::to_string),
                })
            }
            _ => Err(EngineError::Validation(errors)),
        }
    }
}

/// Raw slot query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlotQuery {
    pub tenant_slug: String,
    pub room_id: String,
    pub service_id: String,
    /// Horizon in days. Clamped by the engine, never rejected.
    pub days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSlotQuery {
    pub tenant_slug: String,
    pub room_id: Ulid,
    pub service_id: Ulid,
    pub days: Option<u32>,
}

impl SlotQuery {
    pub fn new(tenant_slug: &str, room_id: Ulid, service_id: Ulid, days: Option<u32>) -> Self {
        Self {
            tenant_slug: tenant_slug.to_string(),
            room_id: room_id.to_string(),
            service_id: service_id.to_string(),
            days,
        }
    }

    pub fn validate(&self) -> Result<ValidatedSlotQuery, EngineError> {
        let mut errors = Vec::new();
        let tenant_slug = self.tenant_slug.trim();
        if tenant_slug.is_empty() {
            errors.push(FieldError::new("tenantSlug", "is required"));
        }
        let room_id = parse_id("roomId", &self.room_id, &mut errors);
        let service_id = parse_id("serviceId", &self.service_id, &mut errors);
        match (room_id, service_id) {
            (Some(room_id), Some(service_id)) if errors.is_empty() => Ok(ValidatedSlotQuery {
                tenant_slug: tenant_slug.to_string(),
                room_id,
                service_id,
                days: self.days,
            }),
            _ => Err(EngineError::Validation(errors)),
        }
    }
}

// ── Catalog inputs ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewService {
    pub name: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub buffer_minutes: u32,
    #[serde(default = "default_true")]
    pub published: bool,
    #[serde(default)]
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRule {
    pub room_id: Option<Ulid>,
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewException {
    pub room_id: Option<Ulid>,
    pub date: NaiveDate,
    pub is_closed: bool,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
}

fn default_true() -> bool {
    true
}

/// Trimmed, non-empty, bounded display name.
pub fn check_name(field: &'static str, name: &str) -> Result<String, EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::invalid(field, "is required"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::invalid(field, "is too long"));
    }
    Ok(name.to_string())
}

impl NewService {
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut errors = Vec::new();
        if let Err(EngineError::Validation(mut e)) = check_name("name", &self.name) {
            errors.append(&mut e);
        }
        if self.duration_minutes == 0 || self.duration_minutes > MAX_SERVICE_MINUTES {
            errors.push(FieldError::new(
                "durationMinutes",
                format!("must be between 1 and {MAX_SERVICE_MINUTES}"),
            ));
        }
        if self.buffer_minutes > MAX_BUFFER_MINUTES {
            errors.push(FieldError::new(
                "bufferMinutes",
                format!("must be at most {MAX_BUFFER_MINUTES}"),
            ));
        }
        if self.price < 0 {
            errors.push(FieldError::new("price", "must not be negative"));
        }
        into_result(errors)
    }
}

impl NewRule {
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut errors = Vec::new();
        if self.day_of_week > 6 {
            errors.push(FieldError::new("dayOfWeek", "must be 0 (Sunday) to 6 (Saturday)"));
        }
        if self.start_time >= self.end_time {
            errors.push(FieldError::new("endTime", "must be after start time"));
        }
        into_result(errors)
    }
}

impl NewException {
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut errors = Vec::new();
        let year = self.date.year();
        if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&year) {
            errors.push(FieldError::new("date", "is out of range"));
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time)
            && start >= end
        {
            errors.push(FieldError::new("endTime", "must be after start time"));
        }
        into_result(errors)
    }
}

fn into_result(errors: Vec<FieldError>) -> Result<(), EngineError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation(errors))
    }
}

// ── Field helpers ────────────────────────────────────────────────

fn parse_id(field: &'static str, raw: &str, errors: &mut Vec<FieldError>) -> Option<Ulid> {
    let raw = raw.trim();
    if raw.is_empty() {
        errors.push(FieldError::new(field, "is required"));
        return None;
    }
    match Ulid::from_string(raw) {
        Ok(id) => Some(id),
        Err(_) => {
            errors.push(FieldError::new(field, "is not a valid id"));
            None
        }
    }
}

fn parse_instant(
    field: &'static str,
    raw: &str,
    errors: &mut Vec<FieldError>,
) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        errors.push(FieldError::new(field, "is required"));
        return None;
    }
    let Ok(parsed) = DateTime::parse_from_rfc3339(raw) else {
        errors.push(FieldError::new(field, "is not a valid RFC 3339 instant"));
        return None;
    };
    let instant = parsed.with_timezone(&Utc);
    if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&instant.year()) {
        errors.push(FieldError::new(field, "is out of range"));
        return None;
    }
    Some(instant)
}

fn optional_text(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

/// Structural check only: one `@`, a non-empty local part, a dotted domain
/// with no empty labels, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}
