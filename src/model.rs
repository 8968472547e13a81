use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds.
pub type Ms = i64;

pub const MS_PER_HOUR: Ms = 3_600_000;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub type ResourceId = Ulid;
pub type ReservationId = Ulid;
/// Opaque id issued by the auth provider.
pub type UserId = String;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    #[allow(dead_code)]
    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceStatus {
    Available,
    Unavailable,
    Maintenance,
}

impl ResourceStatus {
    pub fn is_bookable(self) -> bool {
        matches!(self, ResourceStatus::Available)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceStatus::Available => "AVAILABLE",
            ResourceStatus::Unavailable => "UNAVAILABLE",
            ResourceStatus::Maintenance => "MAINTENANCE",
        })
    }
}

/// A bookable sport field. Read-only from the scheduler's side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: Option<String>,
    pub hourly_rate: Decimal,
    pub status: ResourceStatus,
}

impl Resource {
    pub fn new(id: ResourceId, hourly_rate: Decimal, status: ResourceStatus) -> Self {
        Self {
            id,
            name: None,
            hourly_rate,
            status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl ReservationStatus {
    /// Statuses that occupy the field for conflict purposes.
    pub const ACTIVE: [ReservationStatus; 2] = [ReservationStatus::Pending, ReservationStatus::Confirmed];

    pub fn is_active(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReservationStatus::Cancelled | ReservationStatus::Completed | ReservationStatus::NoShow
        )
    }

    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) | (Confirmed, NoShow) | (Confirmed, Cancelled)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::Completed => "COMPLETED",
            ReservationStatus::NoShow => "NO_SHOW",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
    PartiallyPaid,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentStatus::Unpaid => "UNPAID",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::PartiallyPaid => "PARTIALLY_PAID",
        })
    }
}

/// A time-bounded claim on a field. `total_price` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub resource_id: ResourceId,
    pub user_id: UserId,
    pub start_time: Ms,
    pub end_time: Ms,
    pub status: ReservationStatus,
    pub total_price: Decimal,
    pub participant_count: Option<u32>,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Reservation {
    pub fn span(&self) -> Span {
        Span::new(self.start_time, self.end_time)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Caller input for a new booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub resource_id: ResourceId,
    pub user_id: UserId,
    pub start_time: Ms,
    pub end_time: Ms,
    pub participant_count: Option<u32>,
    pub notes: Option<String>,
}

impl BookingRequest {
    pub fn new(resource_id: ResourceId, user_id: impl Into<UserId>, start_time: Ms, end_time: Ms) -> Self {
        Self {
            resource_id,
            user_id: user_id.into(),
            start_time,
            end_time,
            participant_count: None,
            notes: None,
        }
    }

    pub fn with_participants(mut self, count: u32) -> Self {
        self.participant_count = Some(count);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// A fully priced reservation handed to the store; the store assigns the id
/// and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDraft {
    pub resource_id: ResourceId,
    pub user_id: UserId,
    pub span: Span,
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub total_price: Decimal,
    pub participant_count: Option<u32>,
    pub notes: Option<String>,
}

impl ReservationDraft {
    pub fn into_reservation(self, id: ReservationId, now: Ms) -> Reservation {
        Reservation {
            id,
            resource_id: self.resource_id,
            user_id: self.user_id,
            start_time: self.span.start,
            end_time: self.span.end,
            status: self.status,
            total_price: self.total_price,
            participant_count: self.participant_count,
            payment_status: self.payment_status,
            payment_id: None,
            notes: self.notes,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPatch {
    pub status: Option<ReservationStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_id: Option<String>,
    pub notes: Option<String>,
}

/// Store-side selection. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub resource_id: Option<ResourceId>,
    pub user_id: Option<UserId>,
    pub statuses: Option<Vec<ReservationStatus>>,
    pub window: Option<Span>,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        if let Some(rid) = self.resource_id
            && r.resource_id != rid {
                return false;
            }
        if let Some(ref uid) = self.user_id
            && &r.user_id != uid {
                return false;
            }
        if let Some(ref statuses) = self.statuses
            && !statuses.contains(&r.status) {
                return false;
            }
        if let Some(window) = self.window
            && !r.span().overlaps(&window) {
                return false;
            }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

/// All reservations that ever existed on one field, sorted by `start_time`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLedger {
    pub resource_id: ResourceId,
    pub reservations: Vec<Reservation>,
}

impl FieldLedger {
    pub fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by start_time.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.start_time, |r| r.start_time)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    /// Replace a reservation in place. Start time never changes, so order holds.
    pub fn replace(&mut self, reservation: Reservation) -> Option<Reservation> {
        let slot = self.reservations.iter_mut().find(|r| r.id == reservation.id)?;
        Some(std::mem::replace(slot, reservation))
    }

    pub fn get(&self, id: &ReservationId) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    /// Reservations whose span overlaps the query window, any status.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.start_time < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.end_time > query.start)
    }

    /// First active reservation overlapping `span`, ignoring `except`.
    pub fn first_active_conflict(&self, span: &Span, except: Option<ReservationId>) -> Option<&Reservation> {
        self.overlapping(span)
            .find(|r| r.is_active() && Some(r.id) != except)
    }
}

/// Durable log record. Snapshots, not deltas: replay is last-write-wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceUpserted { resource: Resource },
    ReservationCreated { reservation: Reservation },
    ReservationUpdated { reservation: Reservation },
}

impl Event {
    pub fn resource_id(&self) -> ResourceId {
        match self {
            Event::ResourceUpserted { resource } => resource.id,
            Event::ReservationCreated { reservation } | Event::ReservationUpdated { reservation } => {
                reservation.resource_id
            }
        }
    }
}
