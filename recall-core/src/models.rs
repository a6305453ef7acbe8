use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type CardId = Uuid;

pub const MS_PER_DAY: i64 = 24 * 3600 * 1000;

/// Due dates are accepted in any of these formats, wherever they appear
/// (note frontmatter or embedded card annotations).
pub const DUE_DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d-%m-%Y", "%a %b %d %Y"];

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewResponse {
    Easy,
    Good,
    Hard,
    Reset,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    SingleLineBasic,
    MultiLineBasic,
    Cloze,
}

/// Scheduling state a card was extracted with. `Due` carries everything the
/// scheduler needs when the card is answered.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CardState {
    New,
    Due {
        interval: f32,
        ease: u32,
        delay_ms: i64,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub note_path: String,
    pub card_type: CardType,
    pub front: String,
    pub back: String,
    /// Canonical source span the card was parsed from; its hash is the
    /// card's burial fingerprint.
    pub text: String,
    pub fingerprint: u64,
    /// Heading breadcrumb ("Chapter > Section"), empty when context display
    /// is off.
    pub context: String,
    pub state: CardState,
    /// Position of this deletion among its cloze siblings.
    pub sibling_idx: Option<usize>,
    /// Index into the pass-local sibling-group arena; all cards extracted
    /// from the same cloze block share one group.
    pub sibling_group: Option<usize>,
}

impl Card {
    pub fn is_due(&self) -> bool {
        matches!(self.state, CardState::Due { .. })
    }
}

/// A scheduled note with its position in the review queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedNote {
    pub path: String,
    pub due: DateTime<Utc>,
    /// Days until due, negative when overdue. `None` when the stored due
    /// date failed to parse (treated as not yet due).
    pub days_until_due: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkStat {
    pub source_path: String,
    pub link_count: u32,
}

/// One entry of a note's heading outline, as supplied by the host.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Heading {
    pub level: u32,
    pub text: String,
    /// Absolute byte offset of the heading in the note text.
    pub offset: usize,
}

/// Host-supplied view of one document, consumed by both passes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NoteMeta {
    pub path: String,
    pub tags: Vec<String>,
    pub due: Option<String>,
    pub interval: Option<f32>,
    pub ease: Option<u32>,
    /// Outgoing resolved links with reference counts.
    pub links: HashMap<String, u32>,
    pub headings: Vec<Heading>,
}

impl NoteMeta {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// A note is scheduled only when the full triple is present.
    pub fn has_scheduling(&self) -> bool {
        self.due.is_some() && self.interval.is_some() && self.ease.is_some()
    }
}

/// Parse a due date in any accepted format. Unparseable input is `None`,
/// never an error; callers treat such items as not yet due.
pub fn parse_due_date(s: &str) -> Option<NaiveDate> {
    DUE_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s.trim(), fmt).ok())
}

/// Due dates are day-granular; midnight UTC anchors them on a timeline.
pub fn due_datetime(s: &str) -> Option<DateTime<Utc>> {
    let date = parse_due_date(s)?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Day offset of `due` relative to `now`, rounded up: anything still ahead
/// today lands on day 1, exactly-now is day 0, overdue is negative.
/// Matches the histogram keying.
pub fn days_until(due: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let diff = due.timestamp_millis() - now.timestamp_millis();
    diff.div_euclid(MS_PER_DAY) + if diff.rem_euclid(MS_PER_DAY) > 0 { 1 } else { 0 }
}

/// Stable content fingerprint used for burial. First eight little-endian
/// bytes of the md5 digest; stable across runs for identical text.
pub fn fingerprint(text: &str) -> u64 {
    let d = md5::compute(text.as_bytes()).0;
    u64::from_le_bytes([d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]])
}
