//! Event rows and the cut-job state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

/// Job state. Editors move rows out of `UNEDITED`; cutters own the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum EventState {
    Unedited,
    Edited,
    Claimed,
    Finalizing,
    Transcoding,
    Done,
    Modified,
}

impl EventState {
    pub fn as_str(self) -> &'static str {
        match self {
            EventState::Unedited => "UNEDITED",
            EventState::Edited => "EDITED",
            EventState::Claimed => "CLAIMED",
            EventState::Finalizing => "FINALIZING",
            EventState::Transcoding => "TRANSCODING",
            EventState::Done => "DONE",
            EventState::Modified => "MODIFIED",
        }
    }

    /// Whether `from -> to` is one of the legal transition edges.
    ///
    /// Every database write with a state change goes through a guarded
    /// UPDATE whose precondition encodes one of these edges; this
    /// function is the single place the edge set is written down.
    pub fn can_transition(from: EventState, to: EventState) -> bool {
        use EventState::*;
        matches!(
            (from, to),
            (Unedited, Edited)
                | (Edited, Unedited)
                | (Edited, Claimed)
                | (Claimed, Edited)
                | (Claimed, Unedited)
                | (Claimed, Finalizing)
                | (Finalizing, Edited)
                | (Finalizing, Unedited)
                | (Finalizing, Transcoding)
                | (Finalizing, Done)
                | (Transcoding, Done)
                | (Done, Modified)
                | (Modified, Done)
        )
    }
}

impl std::fmt::Display for EventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One wall-clock cut range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A named filter applied over the overlap between two adjacent ranges.
/// `None` in the transition list means a hard cut.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(rename = "type")]
    pub kind: String,
    pub duration: f64,
}

/// Pixel rectangle, used both for video crop and thumbnail placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crop {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ThumbnailMode {
    None,
    Bare,
    Template,
    Custom,
}

/// One cut job, as stored in the `events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Event {
    pub id: String,
    pub sheet_name: String,
    pub event_start: Option<DateTime<Utc>>,
    pub event_end: Option<DateTime<Utc>>,
    pub category: String,
    pub description: String,
    pub image_links: Json<Vec<String>>,
    pub tags: Json<Vec<String>>,

    pub video_ranges: Option<Json<Vec<TimeRange>>>,
    pub video_transitions: Option<Json<Vec<Option<Transition>>>>,
    pub video_crop: Option<Json<Crop>>,
    pub video_title: Option<String>,
    pub video_description: Option<String>,
    pub video_tags: Option<Json<Vec<String>>>,
    pub video_channel: Option<String>,
    pub video_quality: Option<String>,
    pub thumbnail_mode: ThumbnailMode,
    pub thumbnail_time: Option<DateTime<Utc>>,
    pub thumbnail_template: Option<String>,
    pub thumbnail_image: Option<Vec<u8>>,
    pub thumbnail_crop: Option<Json<Crop>>,
    pub thumbnail_location: Option<Json<Crop>>,
    pub thumbnail_last_written: Option<String>,
    pub allow_holes: bool,
    pub public: bool,
    pub uploader_whitelist: Option<Json<Vec<String>>>,
    pub upload_location: Option<String>,

    pub state: EventState,
    pub uploader: Option<String>,
    pub error: Option<String>,
    pub video_id: Option<String>,
    pub video_link: Option<String>,
    pub editor: Option<String>,
    pub edit_time: Option<DateTime<Utc>>,
    pub upload_time: Option<DateTime<Utc>>,
    pub last_modified: DateTime<Utc>,
}

impl Event {
    /// A blank row in `UNEDITED`, the shape the sheet sync creates.
    pub fn new(id: impl Into<String>, sheet_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sheet_name: sheet_name.into(),
            event_start: None,
            event_end: None,
            category: String::new(),
            description: String::new(),
            image_links: Json(Vec::new()),
            tags: Json(Vec::new()),
            video_ranges: None,
            video_transitions: None,
            video_crop: None,
            video_title: None,
            video_description: None,
            video_tags: None,
            video_channel: None,
            video_quality: None,
            thumbnail_mode: ThumbnailMode::None,
            thumbnail_time: None,
            thumbnail_template: None,
            thumbnail_image: None,
            thumbnail_crop: None,
            thumbnail_location: None,
            thumbnail_last_written: None,
            allow_holes: false,
            public: true,
            uploader_whitelist: None,
            upload_location: None,
            state: EventState::Unedited,
            uploader: None,
            error: None,
            video_id: None,
            video_link: None,
            editor: None,
            edit_time: None,
            upload_time: None,
            last_modified: Utc::now(),
        }
    }

    /// Edit-input arity invariant: transitions must number ranges - 1.
    pub fn transitions_match_ranges(&self) -> bool {
        match (&self.video_ranges, &self.video_transitions) {
            (Some(ranges), Some(transitions)) => {
                !ranges.0.is_empty() && transitions.0.len() == ranges.0.len() - 1
            }
            (Some(ranges), None) => ranges.0.len() == 1,
            (None, _) => true,
        }
    }
}
