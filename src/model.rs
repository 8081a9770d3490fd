use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

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

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Optional-bounded query range. A missing bound extends to the beginning or
/// end of time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub from: Option<Ms>,
    pub until: Option<Ms>,
}

impl Window {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: Ms, until: Ms) -> Self {
        Self {
            from: Some(from),
            until: Some(until),
        }
    }

    pub fn intersects(&self, span: &Span) -> bool {
        self.from.is_none_or(|f| span.end > f) && self.until.is_none_or(|u| span.start < u)
    }

    /// The window as a concrete span, with open bounds clamped to `[lo, hi)`.
    pub fn clamp(&self, lo: Ms, hi: Ms) -> Span {
        Span {
            start: self.from.unwrap_or(lo),
            end: self.until.unwrap_or(hi),
        }
    }
}

/// What a timespan represents. Only reservations hold a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeSpanKind {
    ResourceReservation,
    Illness,
    Vacation,
}

impl TimeSpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeSpanKind::ResourceReservation => "RESOURCE_RESERVATION",
            TimeSpanKind::Illness => "ILLNESS",
            TimeSpanKind::Vacation => "VACATION",
        }
    }

    pub fn is_absence(&self) -> bool {
        matches!(self, TimeSpanKind::Illness | TimeSpanKind::Vacation)
    }
}

impl fmt::Display for TimeSpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeSpanKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RESOURCE_RESERVATION" | "RESERVATION" => Ok(TimeSpanKind::ResourceReservation),
            "ILLNESS" => Ok(TimeSpanKind::Illness),
            "VACATION" => Ok(TimeSpanKind::Vacation),
            other => Err(format!("unknown timespan kind: {other}")),
        }
    }
}

/// The atomic scheduling unit: a reservation, illness or vacation period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub id: Ulid,
    pub title: String,
    pub description: String,
    pub span: Span,
    pub kind: TimeSpanKind,
    pub department: Ulid,
    /// Set iff `kind == ResourceReservation`.
    pub resource: Option<Ulid>,
    /// Zero-based slot on the resource. `None` for absences, and for a
    /// reservation admitted while no single slot was free for its whole span.
    pub slot: Option<u32>,
    pub owner: Ulid,
}

impl TimeSpan {
    pub fn is_reservation(&self) -> bool {
        self.kind == TimeSpanKind::ResourceReservation
    }
}

/// Request to reserve a resource. The id is chosen by the caller so that a
/// retried request cannot create a second reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Request to register an illness or vacation period for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAbsence {
    pub id: Ulid,
    pub kind: TimeSpanKind,
    pub start: Ms,
    pub end: Ms,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// The mutable fields of a timespan. Anything not listed here cannot be
/// changed after creation; `span` is only accepted for absences.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeSpanPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub span: Option<(Ms, Ms)>,
}

impl TimeSpanPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.span.is_none()
    }
}

/// A schedulable entity as served by the resource directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub group: String,
    pub department: Ulid,
    /// Max concurrent reservations (default 1).
    #[serde(default = "default_slots")]
    pub slots: u32,
    /// Device attributes (ip, commands, geo, online flag, ...). Never interpreted here.
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

fn default_slots() -> u32 {
    1
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Ulid,
    pub departments: Vec<Ulid>,
    pub admin: bool,
}

impl Principal {
    pub fn is_member(&self, department: &Ulid) -> bool {
        self.departments.contains(department)
    }

    pub fn can_see(&self, department: &Ulid) -> bool {
        self.admin || self.is_member(department)
    }

    /// The department absences are filed under.
    pub fn primary_department(&self) -> Option<Ulid> {
        self.departments.first().copied()
    }
}

/// How many of a resource's slots are taken at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub resource_id: Ulid,
    pub at: Ms,
    pub in_use: u32,
    pub slots: u32,
}

/// Per-resource overlap index: every reservation on one resource, sorted by
/// `span.start`, plus the longest reservation length. The length bounds how
/// far back a query must look, so lookups are a binary search plus the
/// candidates inside `[query.start - max_len, query.end)`.
#[derive(Debug, Clone)]
pub struct OverlapIndex {
    pub resource_id: Ulid,
    entries: Vec<TimeSpan>,
    max_len: Ms,
}

impl OverlapIndex {
    pub fn new(resource_id: Ulid) -> Self {
        Self {
            resource_id,
            entries: Vec::new(),
            max_len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TimeSpan] {
        &self.entries
    }

    pub fn get(&self, id: Ulid) -> Option<&TimeSpan> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, record: TimeSpan) {
        self.max_len = self.max_len.max(record.span.duration_ms());
        let pos = self
            .entries
            .partition_point(|e| e.span.start <= record.span.start);
        self.entries.insert(pos, record);
    }

    /// Remove by id.
    pub fn remove(&mut self, id: Ulid) -> Option<TimeSpan> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        let removed = self.entries.remove(pos);
        if removed.span.duration_ms() >= self.max_len {
            self.max_len = self
                .entries
                .iter()
                .map(|e| e.span.duration_ms())
                .max()
                .unwrap_or(0);
        }
        Some(removed)
    }

    /// Swap in a new version of an existing record.
    pub fn replace(&mut self, record: TimeSpan) -> Option<TimeSpan> {
        let previous = self.remove(record.id)?;
        self.insert(record);
        Some(previous)
    }

    /// Reservations whose span overlaps the query, in `span.start` order.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &TimeSpan> {
        // Anything starting at or before query.start - max_len has ended by query.start.
        let horizon = query.start.saturating_sub(self.max_len);
        let left = self.entries.partition_point(|e| e.span.start <= horizon);
        // Everything at index >= right starts at or after query.end, so cannot overlap.
        let right = self.entries.partition_point(|e| e.span.start < query.end);
        let right = right.max(left);
        let start = query.start;
        self.entries[left..right]
            .iter()
            .filter(move |e| e.span.end > start)
    }

    /// Ids of reservations that ended at or before `cutoff`.
    pub fn ended_by(&self, cutoff: Ms) -> Vec<Ulid> {
        self.entries
            .iter()
            .take_while(|e| e.span.start < cutoff)
            .filter(|e| e.span.end <= cutoff)
            .map(|e| e.id)
            .collect()
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TimeSpanStored { record: TimeSpan },
    TimeSpanAmended { record: TimeSpan },
    TimeSpanRemoved { id: Ulid },
}
