use crate::model::*;
use crate::store::StoreError;

/// Failure of a scheduler operation.
///
/// Validation errors reject the request before any store access and mean the
/// caller must change the request: `InvalidInterval`,
/// `InvalidParticipantCount` and `LimitExceeded` (timestamps outside
/// 2000..2100, a booking longer than the configured maximum, oversized notes
/// or payment ids, an over-wide query window). See [`BookingError::is_validation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    ResourceNotFound(ResourceId),
    ResourceUnavailable {
        id: ResourceId,
        status: ResourceStatus,
    },
    InvalidInterval {
        start: Ms,
        end: Ms,
    },
    InvalidParticipantCount(u32),
    /// The requested span overlaps an active reservation. The id is for
    /// operator diagnostics and is deliberately absent from `Display`.
    SlotAlreadyBooked {
        conflicting: ReservationId,
    },
    /// Store failure or timeout. The only retryable error; retry the whole call.
    StoreUnavailable(String),
    ReservationNotFound(ReservationId),
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    AlreadyPaid(ReservationId),
    LimitExceeded(&'static str),
}

impl BookingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::StoreUnavailable(_))
    }

    /// The request itself is malformed or out of bounds.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BookingError::InvalidInterval { .. }
                | BookingError::InvalidParticipantCount(_)
                | BookingError::LimitExceeded(_)
        )
    }

    /// Id of the reservation that blocked a booking, for privileged callers.
    pub fn conflicting_reservation(&self) -> Option<ReservationId> {
        match self {
            BookingError::SlotAlreadyBooked { conflicting } => Some(*conflicting),
            _ => None,
        }
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::ResourceNotFound(id) => write!(f, "sport field not found: {id}"),
            BookingError::ResourceUnavailable { id, status } => {
                write!(f, "sport field {id} is not available for booking (status {status})")
            }
            BookingError::InvalidInterval { start, end } => {
                write!(f, "invalid interval [{start}, {end}): end must be after start")
            }
            BookingError::InvalidParticipantCount(n) => write!(f, "invalid participant count: {n}"),
            BookingError::SlotAlreadyBooked { .. } => f.write_str("the selected time slot is already booked"),
            BookingError::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
            BookingError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            BookingError::InvalidTransition { from, to } => {
                write!(f, "cannot move a reservation from {from} to {to}")
            }
            BookingError::AlreadyPaid(id) => write!(f, "reservation {id} has already been paid for"),
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for BookingError {}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ResourceNotFound(id) => BookingError::ResourceNotFound(id),
            StoreError::ReservationNotFound(id) => BookingError::ReservationNotFound(id),
            StoreError::Conflict(id) => BookingError::SlotAlreadyBooked { conflicting: id },
            StoreError::Unavailable(msg) => BookingError::StoreUnavailable(msg),
        }
    }
}
