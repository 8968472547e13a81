use crate::limits::*;
use crate::model::*;

use super::availability::free_spans;
use super::{BookingError, ReservationScheduler};

impl ReservationScheduler {
    pub async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, BookingError> {
        self.bounded(self.store.get_reservation(id)).await
    }

    /// Reservations on one field by ascending start. Without `status` only
    /// `Pending` and `Confirmed` are returned; with `window` only those
    /// overlapping it.
    pub async fn list_resource_reservations(
        &self,
        resource_id: ResourceId,
        window: Option<Span>,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<Reservation>, BookingError> {
        self.bounded(self.store.get_resource(resource_id)).await?;
        let statuses = match status {
            Some(s) => vec![s],
            None => ReservationStatus::ACTIVE.to_vec(),
        };
        let filter = ReservationFilter {
            resource_id: Some(resource_id),
            statuses: Some(statuses),
            window,
            ..Default::default()
        };
        let mut out = self.bounded(self.store.list_reservations(&filter)).await?;
        out.sort_by_key(|r| (r.start_time, r.id));
        Ok(out)
    }

    /// A user's reservations, newest start first. `page` is 1-based; a zero
    /// `limit` means `DEFAULT_PAGE_SIZE` and larger ones are capped at `MAX_PAGE_SIZE`.
    pub async fn list_user_reservations(
        &self,
        user_id: &str,
        status: Option<ReservationStatus>,
        page: usize,
        limit: usize,
    ) -> Result<Page<Reservation>, BookingError> {
        let page = page.max(1);
        let limit = if limit == 0 { DEFAULT_PAGE_SIZE } else { limit.min(MAX_PAGE_SIZE) };
        let filter = ReservationFilter {
            user_id: Some(user_id.to_string()),
            statuses: status.map(|s| vec![s]),
            ..Default::default()
        };
        let mut all = self.bounded(self.store.list_reservations(&filter)).await?;
        all.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));

        let total = all.len();
        let items = all
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();
        Ok(Page {
            items,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        })
    }

    /// Free sub-spans of `window` on a field, for greying out taken slots.
    pub async fn free_slots(&self, resource_id: ResourceId, window: Span) -> Result<Vec<Span>, BookingError> {
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(BookingError::LimitExceeded("query window too wide"));
        }
        self.bounded(self.store.get_resource(resource_id)).await?;
        let active = self
            .bounded(self.store.list_active_reservations(resource_id, &ReservationStatus::ACTIVE))
            .await?;
        Ok(free_spans(&window, &active))
    }
}
