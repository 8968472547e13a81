use rust_decimal::Decimal;

use crate::limits::*;
use crate::model::*;

use super::BookingError;

/// Reject malformed requests before anything touches the store.
pub(crate) fn validate_request(request: &BookingRequest, max_duration_ms: Ms) -> Result<Span, BookingError> {
    let span = Span::try_new(request.start_time, request.end_time).ok_or(BookingError::InvalidInterval {
        start: request.start_time,
        end: request.end_time,
    })?;
    if let Some(count) = request.participant_count
        && (count == 0 || count > MAX_PARTICIPANTS) {
            return Err(BookingError::InvalidParticipantCount(count));
        }
    validate_span(&span, max_duration_ms)?;
    if let Some(ref notes) = request.notes
        && notes.len() > MAX_NOTES_LEN {
            return Err(BookingError::LimitExceeded("notes too long"));
        }
    Ok(span)
}

pub(crate) fn validate_span(span: &Span, max_duration_ms: Ms) -> Result<(), BookingError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(BookingError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > max_duration_ms {
        return Err(BookingError::LimitExceeded("booking too long"));
    }
    Ok(())
}

/// First active reservation sharing at least one instant with `span`.
/// Touching endpoints do not conflict.
pub(crate) fn find_conflict<'a>(existing: &'a [Reservation], span: &Span) -> Option<&'a Reservation> {
    existing
        .iter()
        .find(|r| r.is_active() && r.start_time < span.end && r.end_time > span.start)
}

/// `hourly_rate × duration`, multiplying before dividing so whole-minute
/// fractions of an hour price exactly.
pub(crate) fn compute_price(hourly_rate: Decimal, span: &Span) -> Result<Decimal, BookingError> {
    if hourly_rate < Decimal::ZERO {
        return Err(BookingError::LimitExceeded("negative hourly rate"));
    }
    hourly_rate
        .checked_mul(Decimal::from(span.duration_ms()))
        .and_then(|v| v.checked_div(Decimal::from(MS_PER_HOUR)))
        .map(|p| p.normalize())
        .ok_or(BookingError::LimitExceeded("price overflow"))
}
