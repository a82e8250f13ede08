//! Tenant resolution: slug lookup, activity and ownership checks, timezone parsing.

use chrono_tz::Tz;
use tracing::info;
use ulid::Ulid;

use crate::engine::{Engine, EngineError, Entity};
use crate::limits::*;
use crate::model::*;
use crate::store::StoreError;

/// An active tenant with its timezone parsed.
#[derive(Debug, Clone)]
pub struct TenantScope {
    pub tenant: Tenant,
    pub tz: Tz,
}

/// Everything a slot query or booking needs, already checked for eligibility:
/// active tenant, bookable room and published service, all owned by the tenant.
#[derive(Debug, Clone)]
pub struct BookingScope {
    pub tenant: Tenant,
    pub tz: Tz,
    pub room: Room,
    pub service: Service,
}

/// Parse the tenant's IANA timezone, falling back to `default` when unset.
pub fn resolve_timezone(name: Option<&str>, default: &str) -> Result<Tz, EngineError> {
    let name = name.map(str::trim).filter(|n| !n.is_empty()).unwrap_or(default);
    name.parse::<Tz>()
        .map_err(|_| EngineError::InvalidTimezone(name.to_string()))
}

/// Lowercase ASCII letters, digits, `-` and `_`, at most `MAX_SLUG_LEN` bytes.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}

impl Engine {
    /// Look up an active tenant. Malformed, unknown and inactive slugs all read as not found.
    pub async fn resolve_tenant(&self, slug: &str) -> Result<TenantScope, EngineError> {
        let slug = slug.trim();
        if !is_valid_slug(slug) {
            return Err(EngineError::NotFound(Entity::Tenant));
        }
        let tenant = self
            .store
            .tenant_by_slug(slug)
            .await?
            .filter(Tenant::is_active)
            .ok_or(EngineError::NotFound(Entity::Tenant))?;
        let tz = resolve_timezone(tenant.timezone.as_deref(), &self.config.default_timezone)?;
        Ok(TenantScope { tenant, tz })
    }

    pub async fn resolve_booking_scope(
        &self,
        slug: &str,
        room_id: Ulid,
        service_id: Ulid,
    ) -> Result<BookingScope, EngineError> {
        let TenantScope { tenant, tz } = self.resolve_tenant(slug).await?;
        let (room, service) = futures::try_join!(
            self.store.room(tenant.id, room_id),
            self.store.service(tenant.id, service_id),
        )?;
        let room = room
            .filter(|r| r.bookable)
            .ok_or(EngineError::NotFound(Entity::Room))?;
        let service = service
            .filter(|s| s.published)
            .ok_or(EngineError::NotFound(Entity::Service))?;
        Ok(BookingScope {
            tenant,
            tz,
            room,
            service,
        })
    }

    pub async fn register_tenant(
        &self,
        slug: &str,
        name: &str,
        timezone: Option<&str>,
    ) -> Result<Tenant, EngineError> {
        let slug = slug.trim().to_ascii_lowercase();
        let name = name.trim();
        let mut errors = Vec::new();
        if !is_valid_slug(&slug) {
            errors.push(crate::engine::FieldError::new(
                "slug",
                "must be 1-64 lowercase letters, digits, '-' or '_'",
            ));
        }
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            errors.push(crate::engine::FieldError::new("name", "is required (max 200 bytes)"));
        }
        if let Some(tz) = timezone
            && resolve_timezone(Some(tz), DEFAULT_TIMEZONE).is_err()
        {
            errors.push(crate::engine::FieldError::new("timezone", "unknown IANA timezone"));
        }
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }

        let tenant = Tenant {
            id: Ulid::new(),
            slug,
            name: name.to_string(),
            timezone: timezone.map(|tz| tz.trim().to_string()),
            status: TenantStatus::Active,
        };
        self.store
            .insert_tenant(tenant.clone())
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists(_) => EngineError::invalid("slug", "is already taken"),
                other => other.into(),
            })?;
        info!(tenant = %tenant.id, slug = %tenant.slug, "tenant registered");
        Ok(tenant)
    }

    pub async fn set_tenant_active(&self, tenant_id: Ulid, active: bool) -> Result<(), EngineError> {
        let status = if active {
            TenantStatus::Active
        } else {
            TenantStatus::Inactive
        };
        self.store
            .set_tenant_status(tenant_id, status)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => EngineError::NotFound(Entity::Tenant),
                other => other.into(),
            })
    }
}
