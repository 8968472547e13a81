use std::time::Instant;

use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;
use crate::observability::{outcome_label, BOOKING_DURATION_SECONDS, BOOKING_REQUESTS_TOTAL, STATUS_TRANSITIONS_TOTAL};

use super::conflict::{compute_price, find_conflict, validate_request};
use super::{BookingError, ReservationScheduler};

impl ReservationScheduler {
    /// Check the requested span against the field's active reservations and,
    /// when free, persist a priced `Pending`/`Unpaid` reservation.
    ///
    /// Exactly one row is written on success and none on any error. A
    /// `StoreUnavailable` error is the only one worth retrying, and a retry
    /// must call this again from the start.
    pub async fn request_booking(&self, request: BookingRequest) -> Result<Reservation, BookingError> {
        let started = Instant::now();
        let result = self.try_book(request).await;
        metrics::counter!(BOOKING_REQUESTS_TOTAL, "outcome" => outcome_label(&result)).increment(1);
        metrics::histogram!(BOOKING_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    async fn try_book(&self, request: BookingRequest) -> Result<Reservation, BookingError> {
        let span = validate_request(&request, self.config.max_booking_duration_ms)?;
        let resource_id = request.resource_id;

        let _lock = self.lock_resource(resource_id).await?;

        let resource = self.bounded(self.store.get_resource(resource_id)).await?;
        if !resource.status.is_bookable() {
            return Err(BookingError::ResourceUnavailable {
                id: resource_id,
                status: resource.status,
            });
        }

        let active = self
            .bounded(self.store.list_active_reservations(resource_id, &ReservationStatus::ACTIVE))
            .await?;
        if let Some(existing) = find_conflict(&active, &span) {
            debug!(
                "field {resource_id}: [{}, {}) overlaps reservation {}",
                span.start, span.end, existing.id
            );
            return Err(BookingError::SlotAlreadyBooked {
                conflicting: existing.id,
            });
        }

        let total_price = compute_price(resource.hourly_rate, &span)?;
        let draft = ReservationDraft {
            resource_id,
            user_id: request.user_id,
            span,
            status: ReservationStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            total_price,
            participant_count: request.participant_count,
            notes: request.notes,
        };
        let reservation = self.bounded(self.store.insert_reservation(draft)).await?;

        info!(
            "reservation {} created on field {resource_id} for user {} at {}",
            reservation.id, reservation.user_id, reservation.total_price
        );
        self.notify.send(&Event::ReservationCreated {
            reservation: reservation.clone(),
        });
        Ok(reservation)
    }

    /// Apply a partial update. Status changes must follow
    /// [`ReservationStatus::can_transition_to`]; repeating the current status is a no-op.
    pub async fn update_reservation(
        &self,
        id: ReservationId,
        patch: ReservationPatch,
    ) -> Result<Reservation, BookingError> {
        if let Some(ref notes) = patch.notes
            && notes.len() > MAX_NOTES_LEN {
                return Err(BookingError::LimitExceeded("notes too long"));
            }
        if let Some(ref pid) = patch.payment_id
            && pid.len() > MAX_PAYMENT_ID_LEN {
                return Err(BookingError::LimitExceeded("payment id too long"));
            }
        self.modify(id, move |r| {
            if let Some(to) = patch.status
                && to != r.status {
                    if !r.status.can_transition_to(to) {
                        return Err(BookingError::InvalidTransition { from: r.status, to });
                    }
                    r.status = to;
                }
            if let Some(ps) = patch.payment_status {
                r.payment_status = ps;
            }
            if let Some(pid) = patch.payment_id {
                r.payment_id = Some(pid);
            }
            if let Some(notes) = patch.notes {
                r.notes = Some(notes);
            }
            Ok(())
        })
        .await
    }

    /// Soft-cancel. Frees the slot; the row stays.
    pub async fn cancel_reservation(&self, id: ReservationId) -> Result<Reservation, BookingError> {
        self.modify(id, |r| {
            if r.status.is_terminal() {
                return Err(BookingError::InvalidTransition {
                    from: r.status,
                    to: ReservationStatus::Cancelled,
                });
            }
            r.status = ReservationStatus::Cancelled;
            Ok(())
        })
        .await
    }

    /// Mark a reservation paid with the gateway's reference.
    pub async fn record_payment(
        &self,
        id: ReservationId,
        payment_id: impl Into<String>,
    ) -> Result<Reservation, BookingError> {
        let payment_id = payment_id.into();
        if payment_id.len() > MAX_PAYMENT_ID_LEN {
            return Err(BookingError::LimitExceeded("payment id too long"));
        }
        self.modify(id, move |r| {
            if r.payment_status == PaymentStatus::Paid {
                return Err(BookingError::AlreadyPaid(r.id));
            }
            r.payment_status = PaymentStatus::Paid;
            r.payment_id = Some(payment_id);
            Ok(())
        })
        .await
    }

    /// Read, mutate and write back one reservation under its field's lock.
    async fn modify<F>(&self, id: ReservationId, apply: F) -> Result<Reservation, BookingError>
    where
        F: FnOnce(&mut Reservation) -> Result<(), BookingError>,
    {
        let resource_id = self.bounded(self.store.get_reservation(id)).await?.resource_id;
        let _lock = self.lock_resource(resource_id).await?;

        let current = self.bounded(self.store.get_reservation(id)).await?;
        let mut next = current.clone();
        apply(&mut next)?;
        if next == current {
            return Ok(current);
        }

        let saved = self.bounded(self.store.update_reservation(next)).await?;
        if saved.status != current.status {
            metrics::counter!(STATUS_TRANSITIONS_TOTAL, "to" => status_label(saved.status)).increment(1);
            info!("reservation {id}: {} -> {}", current.status, saved.status);
        }
        self.notify.send(&Event::ReservationUpdated {
            reservation: saved.clone(),
        });
        Ok(saved)
    }
}

fn status_label(status: ReservationStatus) -> &'static str {
    match status {
        ReservationStatus::Pending => "pending",
        ReservationStatus::Confirmed => "confirmed",
        ReservationStatus::Cancelled => "cancelled",
        ReservationStatus::Completed => "completed",
        ReservationStatus::NoShow => "no_show",
    }
}
