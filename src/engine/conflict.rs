use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// True iff any occupied span overlaps `span`. Touching endpoints do not count.
pub fn has_conflict(occupied: &[Span], span: &Span) -> bool {
    occupied.iter().any(|o| o.overlaps(span))
}

impl Engine {
    /// Point-in-time check against the room's confirmed bookings. Canceled
    /// bookings never count. This is not a lock: the store's exclusion check on
    /// insert is what actually prevents double booking.
    pub async fn check_conflict(
        &self,
        tenant_id: Ulid,
        room_id: Ulid,
        span: Span,
    ) -> Result<bool, EngineError> {
        let occupied = self
            .store
            .confirmed_bookings(tenant_id, room_id, span)
            .await?;
        Ok(has_conflict(&occupied, &span))
    }
}
