use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds.
pub type Ms = i64;

// ── Placeholder sentinels ────────────────────────────────────────

/// Label shown for a room (or linked room) that could not be resolved.
pub const UNKNOWN_LABEL: &str = "?";
pub const UNKNOWN_ROOM_NAME: &str = "Unknown room";
pub const UNKNOWN_CATEGORY: &str = "unknown";
pub const UNKNOWN_EVENT_TYPE: &str = "Unknown event type";
pub const UNKNOWN_PERSON: &str = "Unknown";

/// A raw foreign-key-like field.
///
/// Classified once when the raw value enters the system: a value that parses
/// as an identifier is an `Identifier`, any other non-blank string is a
/// `Label` (only rooms are ever matched by label; for every other field a
/// label is simply unresolvable), and null/blank is `Absent`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Reference {
    Identifier(Ulid),
    Label(String),
    #[default]
    Absent,
}

impl Reference {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Reference::Absent;
        }
        match Ulid::from_string(trimmed) {
            Ok(id) => Reference::Identifier(id),
            Err(_) => Reference::Label(raw.to_string()),
        }
    }

    pub fn id(&self) -> Option<Ulid> {
        match self {
            Reference::Identifier(id) => Some(*id),
            _ => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Reference::Label(label) => Some(label),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        !matches!(self, Reference::Absent)
    }
}

impl From<Option<String>> for Reference {
    fn from(raw: Option<String>) -> Self {
        raw.as_deref().map_or(Reference::Absent, Reference::parse)
    }
}

impl From<Reference> for Option<String> {
    fn from(reference: Reference) -> Self {
        match reference {
            Reference::Identifier(id) => Some(id.to_string()),
            Reference::Label(label) => Some(label),
            Reference::Absent => None,
        }
    }
}

impl From<Ulid> for Reference {
    fn from(id: Ulid) -> Self {
        Reference::Identifier(id)
    }
}

impl From<Option<Ulid>> for Reference {
    fn from(id: Option<Ulid>) -> Self {
        id.map_or(Reference::Absent, Reference::Identifier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    /// Any status this build does not know about.
    #[serde(other)]
    Unknown,
}

impl ReservationStatus {
    /// Status a room falls back to when it is detached from its event.
    pub const BASELINE: ReservationStatus = ReservationStatus::Pending;

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Unknown => "unknown",
        }
    }
}

/// Which of the two reservation collections a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Room,
    Event,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Room => write!(f, "room"),
            RecordKind::Event => write!(f, "event"),
        }
    }
}

// ── Raw records ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomReservation {
    pub id: Ulid,
    pub check_in: Option<String>,
    pub check_out: Option<String>,
    #[serde(default)]
    pub status: ReservationStatus,
    #[serde(default)]
    pub room_ref: Reference,
    /// Label snapshot taken when the reservation was booked.
    pub room_label: Option<String>,
    #[serde(default)]
    pub event_ref: Reference,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default)]
    pub owner_ref: Reference,
    #[serde(default)]
    pub staff_ref: Reference,
    pub price: Option<f64>,
    pub notes: Option<String>,
}

impl RoomReservation {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            check_in: None,
            check_out: None,
            status: ReservationStatus::default(),
            room_ref: Reference::Absent,
            room_label: None,
            event_ref: Reference::Absent,
            first_name: None,
            last_name: None,
            owner_ref: Reference::Absent,
            staff_ref: Reference::Absent,
            price: None,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedRoom {
    #[serde(default)]
    pub room_reservation_ref: Reference,
}

impl LinkedRoom {
    pub fn new(room_reservation_ref: impl Into<Reference>) -> Self {
        Self {
            room_reservation_ref: room_reservation_ref.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventReservation {
    pub id: Ulid,
    pub date: Option<String>,
    pub end_date: Option<String>,
    #[serde(default)]
    pub status: ReservationStatus,
    #[serde(default)]
    pub event_type_ref: Reference,
    #[serde(default)]
    pub linked_rooms: Vec<LinkedRoom>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default)]
    pub owner_ref: Reference,
    #[serde(default)]
    pub staff_ref: Reference,
    pub price: Option<f64>,
    pub notes: Option<String>,
    pub guest_count: Option<u32>,
}

impl EventReservation {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            date: None,
            end_date: None,
            status: ReservationStatus::default(),
            event_type_ref: Reference::Absent,
            linked_rooms: Vec::new(),
            first_name: None,
            last_name: None,
            owner_ref: Reference::Absent,
            staff_ref: Reference::Absent,
            price: None,
            notes: None,
            guest_count: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub label: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventType {
    pub id: Ulid,
    pub title: String,
}

/// A customer or a staff member; the same entity serves both roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: Ulid,
    pub name: String,
    pub surname: String,
    #[serde(default)]
    pub email: String,
}

// ── Resolved details ─────────────────────────────────────────────
//
// Every details type has exactly one shape. A placeholder is that same shape
// with `id: None` and the sentinel strings above.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomDetails {
    pub id: Option<Ulid>,
    pub label: String,
    pub name: String,
    pub category: String,
}

impl RoomDetails {
    pub fn placeholder() -> Self {
        Self {
            id: None,
            label: UNKNOWN_LABEL.to_string(),
            name: UNKNOWN_ROOM_NAME.to_string(),
            category: UNKNOWN_CATEGORY.to_string(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_none()
    }
}

impl From<&Room> for RoomDetails {
    fn from(room: &Room) -> Self {
        Self {
            id: Some(room.id),
            label: room.label.clone(),
            name: room.name.clone(),
            category: room.category.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeDetails {
    pub id: Option<Ulid>,
    pub title: String,
}

impl EventTypeDetails {
    pub fn placeholder() -> Self {
        Self {
            id: None,
            title: UNKNOWN_EVENT_TYPE.to_string(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_none()
    }
}

impl From<&EventType> for EventTypeDetails {
    fn from(event_type: &EventType) -> Self {
        Self {
            id: Some(event_type.id),
            title: event_type.title.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonDetails {
    pub id: Option<Ulid>,
    pub name: String,
    pub surname: String,
    pub email: String,
}

impl PersonDetails {
    pub fn placeholder() -> Self {
        Self {
            id: None,
            name: UNKNOWN_PERSON.to_string(),
            surname: String::new(),
            email: String::new(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_none()
    }

    pub fn display_name(&self) -> String {
        contact_name(Some(&self.name), Some(&self.surname))
    }
}

impl From<&Person> for PersonDetails {
    fn from(person: &Person) -> Self {
        Self {
            id: Some(person.id),
            name: person.name.clone(),
            surname: person.surname.clone(),
            email: person.email.clone(),
        }
    }
}

/// What a room reservation shows about the event it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLinkDetails {
    pub id: Option<Ulid>,
    pub date: Option<String>,
    pub status: ReservationStatus,
    pub contact_name: String,
}

impl EventLinkDetails {
    pub fn placeholder() -> Self {
        Self {
            id: None,
            date: None,
            status: ReservationStatus::Unknown,
            contact_name: UNKNOWN_PERSON.to_string(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_none()
    }
}

impl From<&EventReservation> for EventLinkDetails {
    fn from(event: &EventReservation) -> Self {
        Self {
            id: Some(event.id),
            date: event.date.clone(),
            status: event.status,
            contact_name: contact_name(event.first_name.as_deref(), event.last_name.as_deref()),
        }
    }
}

/// What an event shows about one of its linked room reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomReservationDetails {
    pub id: Option<Ulid>,
    pub check_in: Option<String>,
    pub check_out: Option<String>,
    pub status: ReservationStatus,
    pub room_label: String,
}

impl RoomReservationDetails {
    pub fn placeholder() -> Self {
        Self {
            id: None,
            check_in: None,
            check_out: None,
            status: ReservationStatus::Unknown,
            room_label: UNKNOWN_LABEL.to_string(),
        }
    }

    pub fn from_reservation(reservation: &RoomReservation, room_label: String) -> Self {
        Self {
            id: Some(reservation.id),
            check_in: reservation.check_in.clone(),
            check_out: reservation.check_out.clone(),
            status: reservation.status,
            room_label,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_none()
    }
}

// ── Resolved records ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRoomReservation {
    #[serde(flatten)]
    pub raw: RoomReservation,
    pub room_details: RoomDetails,
    pub event_details: EventLinkDetails,
    pub owner_details: PersonDetails,
    pub staff_details: PersonDetails,
}

impl ResolvedRoomReservation {
    /// The event this room is linked to, if its `event_ref` is an identifier.
    pub fn event_id(&self) -> Option<Ulid> {
        self.raw.event_ref.id()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLinkedRoom {
    pub room_reservation_ref: Reference,
    pub label: String,
    pub room_reservation_details: RoomReservationDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEventReservation {
    #[serde(flatten)]
    pub raw: EventReservation,
    pub event_type_details: EventTypeDetails,
    pub linked_room_details: Vec<ResolvedLinkedRoom>,
    /// Number of room reservations linked to this event.
    pub linked_room_count: usize,
    pub owner_details: PersonDetails,
    pub staff_details: PersonDetails,
}

/// One row of the dashboard view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ViewItem {
    Room(ResolvedRoomReservation),
    Event(ResolvedEventReservation),
}

impl ViewItem {
    pub fn kind(&self) -> RecordKind {
        match self {
            ViewItem::Room(_) => RecordKind::Room,
            ViewItem::Event(_) => RecordKind::Event,
        }
    }

    pub fn id(&self) -> Ulid {
        match self {
            ViewItem::Room(room) => room.raw.id,
            ViewItem::Event(event) => event.raw.id,
        }
    }

    /// Raw start date: `check_in` for rooms, `date` for events.
    pub fn start_date(&self) -> Option<&str> {
        match self {
            ViewItem::Room(room) => room.raw.check_in.as_deref(),
            ViewItem::Event(event) => event.raw.date.as_deref(),
        }
    }

    pub fn start_ms(&self) -> Option<Ms> {
        self.start_date().and_then(parse_date)
    }
}

// ── Mutations ────────────────────────────────────────────────────

/// A single-field change requested against one reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldPatch {
    Price(Option<f64>),
    Notes(Option<String>),
    ContactName {
        first_name: Option<String>,
        last_name: Option<String>,
    },
    Status(ReservationStatus),
    Staff(Option<Ulid>),
}

impl FieldPatch {
    /// Patches that touch the shared event/room fields.
    pub fn is_linked_field(&self) -> bool {
        matches!(self, FieldPatch::Status(_) | FieldPatch::Staff(_))
    }

    pub fn apply_to_room(&self, room: &mut RoomReservation) {
        match self {
            FieldPatch::Price(price) => room.price = *price,
            FieldPatch::Notes(notes) => room.notes = notes.clone(),
            FieldPatch::ContactName { first_name, last_name } => {
                room.first_name = first_name.clone();
                room.last_name = last_name.clone();
            }
            FieldPatch::Status(status) => room.status = *status,
            FieldPatch::Staff(staff) => room.staff_ref = Reference::from(*staff),
        }
    }

    pub fn apply_to_event(&self, event: &mut EventReservation) {
        match self {
            FieldPatch::Price(price) => event.price = *price,
            FieldPatch::Notes(notes) => event.notes = notes.clone(),
            FieldPatch::ContactName { first_name, last_name } => {
                event.first_name = first_name.clone();
                event.last_name = last_name.clone();
            }
            FieldPatch::Status(status) => event.status = *status,
            FieldPatch::Staff(staff) => event.staff_ref = Reference::from(*staff),
        }
    }
}

// ── Read filter ──────────────────────────────────────────────────

/// Narrows the primary reservation reads. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationFilter {
    #[serde(default)]
    pub statuses: Vec<ReservationStatus>,
    /// Inclusive lower bound on the start date.
    pub from: Option<Ms>,
    /// Exclusive upper bound on the start date.
    pub until: Option<Ms>,
    pub staff: Option<Ulid>,
}

impl ReservationFilter {
    pub fn matches_room(&self, room: &RoomReservation) -> bool {
        self.matches(room.status, room.check_in.as_deref(), &room.staff_ref)
    }

    pub fn matches_event(&self, event: &EventReservation) -> bool {
        self.matches(event.status, event.date.as_deref(), &event.staff_ref)
    }

    fn matches(&self, status: ReservationStatus, start: Option<&str>, staff: &Reference) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&status) {
            return false;
        }
        if let Some(staff_id) = self.staff
            && staff.id() != Some(staff_id)
        {
            return false;
        }
        if self.from.is_none() && self.until.is_none() {
            return true;
        }
        // A windowed read never includes records whose date cannot be placed.
        let Some(start) = start.and_then(parse_date) else {
            return false;
        };
        self.from.is_none_or(|from| start >= from) && self.until.is_none_or(|until| start < until)
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// Parse a stored date into Unix milliseconds.
///
/// Accepts RFC 3339 timestamps, naive `YYYY-MM-DDTHH:MM:SS[.fff]` timestamps
/// (taken as UTC) and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_date(raw: &str) -> Option<Ms> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

pub fn contact_name(first: Option<&str>, last: Option<&str>) -> String {
    let parts: Vec<&str> = [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_classification() {
        let id = Ulid::new();
        assert_eq!(Reference::parse(&id.to_string()), Reference::Identifier(id));
        assert_eq!(Reference::parse("C"), Reference::Label("C".into()));
        assert_eq!(Reference::parse(""), Reference::Absent);
        assert_eq!(Reference::parse("   "), Reference::Absent);
        assert_eq!(Reference::from(None::<String>), Reference::Absent);
    }

    #[test]
    fn reference_keeps_raw_label_text() {
        let reference = Reference::parse(" Suite B ");
        assert_eq!(reference.label(), Some(" Suite B "));
        assert_eq!(reference.id(), None);
        assert!(reference.is_present());
    }

    #[test]
    fn reference_serializes_as_raw_string() {
        let id = Ulid::new();
        let json = serde_json::to_value(Reference::Identifier(id)).unwrap();
        assert_eq!(json, serde_json::json!(id.to_string()));
        let json = serde_json::to_value(Reference::Label("C".into())).unwrap();
        assert_eq!(json, serde_json::json!("C"));
        let json = serde_json::to_value(Reference::Absent).unwrap();
        assert!(json.is_null());
    }

    #[test]
    fn raw_record_deserializes_loose_references() {
        let event_id = Ulid::new();
        let json = serde_json::json!({
            "id": Ulid::new().to_string(),
            "check_in": "2026-03-01",
            "room_ref": "C",
            "event_ref": event_id.to_string(),
            "owner_ref": "not-an-id",
            "status": "archived",
        });
        let room: RoomReservation = serde_json::from_value(json).unwrap();
        assert_eq!(room.room_ref, Reference::Label("C".into()));
        assert_eq!(room.event_ref, Reference::Identifier(event_id));
        assert_eq!(room.owner_ref, Reference::Label("not-an-id".into()));
        assert_eq!(room.staff_ref, Reference::Absent);
        assert_eq!(room.status, ReservationStatus::Unknown);
    }

    #[test]
    fn placeholders_share_shape_with_resolved_details() {
        let room = Room {
            id: Ulid::new(),
            label: "A".into(),
            name: "Alpine".into(),
            category: "suite".into(),
        };
        let resolved = serde_json::to_value(RoomDetails::from(&room)).unwrap();
        let placeholder = serde_json::to_value(RoomDetails::placeholder()).unwrap();
        let keys = |v: &serde_json::Value| {
            let mut keys: Vec<String> = v.as_object().unwrap().keys().cloned().collect();
            keys.sort();
            keys
        };
        assert_eq!(keys(&resolved), keys(&placeholder));
        assert!(placeholder["id"].is_null());
        assert_eq!(placeholder["label"], UNKNOWN_LABEL);
    }

    #[test]
    fn parse_date_formats() {
        assert_eq!(parse_date("1970-01-02"), Some(86_400_000));
        assert_eq!(parse_date("1970-01-01T00:00:01Z"), Some(1_000));
        assert_eq!(parse_date("1970-01-01T00:00:01.500"), Some(1_500));
        assert_eq!(parse_date("1970-01-01T02:00:00+02:00"), Some(0));
        assert_eq!(parse_date("next tuesday"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn filter_by_status_and_window() {
        let mut room = RoomReservation::new(Ulid::new());
        room.check_in = Some("2026-05-10".into());
        room.status = ReservationStatus::Confirmed;

        let everything = ReservationFilter::default();
        assert!(everything.matches_room(&room));

        let pending_only = ReservationFilter {
            statuses: vec![ReservationStatus::Pending],
            ..Default::default()
        };
        assert!(!pending_only.matches_room(&room));

        let may = ReservationFilter {
            from: parse_date("2026-05-01"),
            until: parse_date("2026-06-01"),
            ..Default::default()
        };
        assert!(may.matches_room(&room));

        room.check_in = Some("garbage".into());
        assert!(!may.matches_room(&room));
    }

    #[test]
    fn filter_by_staff() {
        let staff = Ulid::new();
        let mut event = EventReservation::new(Ulid::new());
        let filter = ReservationFilter {
            staff: Some(staff),
            ..Default::default()
        };
        assert!(!filter.matches_event(&event));
        event.staff_ref = Reference::from(staff);
        assert!(filter.matches_event(&event));
    }

    #[test]
    fn linked_field_patches() {
        assert!(FieldPatch::Staff(None).is_linked_field());
        assert!(FieldPatch::Status(ReservationStatus::Confirmed).is_linked_field());
        assert!(!FieldPatch::Price(Some(120.0)).is_linked_field());

        let mut room = RoomReservation::new(Ulid::new());
        FieldPatch::Price(Some(99.5)).apply_to_room(&mut room);
        assert_eq!(room.price, Some(99.5));
    }

    #[test]
    fn contact_name_skips_blank_parts() {
        assert_eq!(contact_name(Some("Ada"), Some("Lovelace")), "Ada Lovelace");
        assert_eq!(contact_name(Some(" "), Some("Lovelace")), "Lovelace");
        assert_eq!(contact_name(None, None), "");
    }

    #[test]
    fn view_item_tagged_by_kind() {
        let room = ResolvedRoomReservation {
            raw: RoomReservation::new(Ulid::new()),
            room_details: RoomDetails::placeholder(),
            event_details: EventLinkDetails::placeholder(),
            owner_details: PersonDetails::placeholder(),
            staff_details: PersonDetails::placeholder(),
        };
        let json = serde_json::to_value(ViewItem::Room(room)).unwrap();
        assert_eq!(json["kind"], "room");
        assert!(json["event_ref"].is_null());
        assert!(json["room_details"]["id"].is_null());
    }
}
