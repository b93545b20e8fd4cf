use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

/// Unix milliseconds, used for every audit timestamp.
pub type Ms = i64;

/// Minutes since midnight. Renders and parses as `HH:MM`; `24:00` is the end of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);
    pub const END_OF_DAY: TimeOfDay = TimeOfDay(24 * 60);

    pub fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        let total = hour.checked_mul(60)?.checked_add(minute)?;
        (total <= Self::END_OF_DAY.0).then_some(Self(total))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeError(String);

impl fmt::Display for ParseTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day {:?} (expected HH:MM)", self.0)
    }
}

impl std::error::Error for ParseTimeError {}

impl FromStr for TimeOfDay {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTimeError(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(err)?;
        let two_digits = |part: &str| part.len() == 2 && part.bytes().all(|b| b.is_ascii_digit());
        if !two_digits(h) || !two_digits(m) {
            return Err(err());
        }
        let hour: u16 = h.parse().map_err(|_| err())?;
        let minute: u16 = m.parse().map_err(|_| err())?;
        TimeOfDay::from_hm(hour, minute).ok_or_else(err)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Half-open interval `[start, end)` within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl Span {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: TimeOfDay, end: TimeOfDay) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn whole_day() -> Self {
        Self::new(TimeOfDay::MIDNIGHT, TimeOfDay::END_OF_DAY)
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end.minutes() - self.start.minutes()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Available,
    Unavailable,
    Maintenance,
}

impl ResourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::Available => "available",
            ResourceStatus::Unavailable => "unavailable",
            ResourceStatus::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bookable room. Only `Available` resources accept new bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: Ulid,
    pub name: String,
    pub location: Option<String>,
    pub capacity: u32,
    pub status: ResourceStatus,
}

/// Status without the per-state payload; what callers filter and ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl StatusKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, StatusKind::Rejected | StatusKind::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusKind::Pending => "pending",
            StatusKind::Approved => "approved",
            StatusKind::Rejected => "rejected",
            StatusKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a reservation together with the data only that state carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved { approved_at: Ms, approved_by: String },
    Rejected { remarks: String, rejected_at: Ms, rejected_by: String },
    Cancelled { cancelled_at: Ms, cancelled_by: String },
}

impl BookingStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            BookingStatus::Pending => StatusKind::Pending,
            BookingStatus::Approved { .. } => StatusKind::Approved,
            BookingStatus::Rejected { .. } => StatusKind::Rejected,
            BookingStatus::Cancelled { .. } => StatusKind::Cancelled,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, BookingStatus::Approved { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
    pub requester_id: String,
    /// Requester's department at creation time; never refreshed.
    pub department_id: Option<String>,
    pub purpose: String,
    pub attendees: u32,
    pub requirements: Vec<String>,
    pub notes: Option<String>,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub updated_by: String,
    /// Bumped by one on every persisted change.
    pub revision: u32,
}

impl Reservation {
    pub fn key(&self) -> ReservationKey {
        ReservationKey {
            resource_id: self.resource_id,
            date: self.date,
        }
    }
}

/// Where a reservation lives inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationKey {
    pub resource_id: Ulid,
    pub date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource: Resource,
    /// Reservations per day, each day sorted by `span.start`.
    pub days: BTreeMap<NaiveDate, Vec<Reservation>>,
    /// Set under the write lock when the resource is deleted. Writers that were
    /// queued on the lock must not touch the state afterwards.
    pub deleted: bool,
}

impl ResourceState {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            days: BTreeMap::new(),
            deleted: false,
        }
    }

    pub fn id(&self) -> Ulid {
        self.resource.id
    }

    pub fn reservation_count(&self) -> usize {
        self.days.values().map(Vec::len).sum()
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let day = self.days.entry(reservation.date).or_default();
        let pos = day
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        day.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid, date: NaiveDate) -> Option<Reservation> {
        let day = self.days.get_mut(&date)?;
        let pos = day.iter().position(|r| r.id == id)?;
        let removed = day.remove(pos);
        if day.is_empty() {
            self.days.remove(&date);
        }
        Some(removed)
    }

    pub fn get_reservation(&self, id: Ulid, date: NaiveDate) -> Option<&Reservation> {
        self.days.get(&date)?.iter().find(|r| r.id == id)
    }

    /// Reservations of `date` whose span overlaps `query`, in any status.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, date: NaiveDate, query: &Span) -> impl Iterator<Item = &Reservation> {
        let day: &[Reservation] = self.days.get(&date).map(Vec::as_slice).unwrap_or(&[]);
        let right_bound = day.partition_point(|r| r.span.start < query.end);
        day[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.days.values().flatten()
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        resource: Resource,
    },
    ResourceUpdated {
        resource: Resource,
    },
    ResourceDeleted {
        id: Ulid,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    /// `from` is where the previous revision lived; it differs from the new key
    /// when the schedule moved to another day or resource.
    ReservationUpdated {
        from: ReservationKey,
        reservation: Reservation,
    },
    ReservationDeleted {
        id: Ulid,
        key: ReservationKey,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ResourceCreated { .. } => "resource_created",
            Event::ResourceUpdated { .. } => "resource_updated",
            Event::ResourceDeleted { .. } => "resource_deleted",
            Event::ReservationCreated { .. } => "reservation_created",
            Event::ReservationUpdated { .. } => "reservation_updated",
            Event::ReservationDeleted { .. } => "reservation_deleted",
        }
    }
}

// ── Query types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub resource_id: Option<Ulid>,
    /// Inclusive.
    pub date_from: Option<NaiveDate>,
    /// Inclusive.
    pub date_to: Option<NaiveDate>,
    pub status: Option<StatusKind>,
    pub requester_id: Option<String>,
    pub department_id: Option<String>,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.resource_id.is_none_or(|id| r.resource_id == id)
            && self.date_from.is_none_or(|d| r.date >= d)
            && self.date_to.is_none_or(|d| r.date <= d)
            && self.status.is_none_or(|s| r.status.kind() == s)
            && self
                .requester_id
                .as_deref()
                .is_none_or(|id| r.requester_id == id)
            && self
                .department_id
                .as_deref()
                .is_none_or(|d| r.department_id.as_deref() == Some(d))
    }
}
