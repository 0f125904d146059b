//! Cut request validation.
//!
//! Everything here runs before any file is opened or subprocess
//! spawned: an invalid combination must fail with a descriptive error,
//! not half a video.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CutError;

/// How the output bytes are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CutType {
    /// Raw byte concatenation of whole segments; no trimming, no
    /// re-encode, up to one segment of slack on each end.
    Fast,
    /// Boundary-accurate hybrid: re-encode the edges, stream-copy the
    /// middle. The default.
    Smart,
    /// Frame-accurate full re-encode to MPEG-TS.
    Full,
    /// Full re-encode to WebM (VP9/Opus), used for previews.
    Webm,
}

impl CutType {
    pub fn as_str(self) -> &'static str {
        match self {
            CutType::Fast => "fast",
            CutType::Smart => "smart",
            CutType::Full => "full",
            CutType::Webm => "webm",
        }
    }
}

impl std::str::FromStr for CutType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(CutType::Fast),
            "smart" => Ok(CutType::Smart),
            "full" => Ok(CutType::Full),
            "webm" => Ok(CutType::Webm),
            other => Err(format!("unknown cut type {other:?}")),
        }
    }
}

/// The transition filters we know how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Fade,
    WipeLeft,
    WipeRight,
    WipeUp,
    WipeDown,
    Dissolve,
}

impl TransitionKind {
    /// The xfade `transition=` name.
    pub fn filter_name(self) -> &'static str {
        match self {
            TransitionKind::Fade => "fade",
            TransitionKind::WipeLeft => "wipeleft",
            TransitionKind::WipeRight => "wiperight",
            TransitionKind::WipeUp => "wipeup",
            TransitionKind::WipeDown => "wipedown",
            TransitionKind::Dissolve => "dissolve",
        }
    }

    pub fn parse(name: &str) -> Result<Self, CutError> {
        match name {
            "fade" => Ok(TransitionKind::Fade),
            "wipeleft" => Ok(TransitionKind::WipeLeft),
            "wiperight" => Ok(TransitionKind::WipeRight),
            "wipeup" => Ok(TransitionKind::WipeUp),
            "wipedown" => Ok(TransitionKind::WipeDown),
            "dissolve" => Ok(TransitionKind::Dissolve),
            other => Err(CutError::UnknownTransition(other.to_string())),
        }
    }
}

/// A named filter applied over the overlap of two adjacent ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(rename = "type")]
    pub kind: TransitionKind,
    pub duration: f64,
}

/// Pixel rectangle for video crop or thumbnail placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Validate ranges, transitions, and cut type together.
///
/// Checks: at least one range, every range non-empty, transition count
/// = ranges - 1, transitions known with positive durations that fit in
/// both adjoining ranges, and fast mode carrying neither transitions
/// nor crop.
pub fn validate_cut(
    ranges: &[(DateTime<Utc>, DateTime<Utc>)],
    transitions: &[Option<Transition>],
    cut_type: CutType,
    crop: Option<Rect>,
) -> Result<(), CutError> {
    if ranges.is_empty() {
        return Err(CutError::NoRanges);
    }
    for (index, (start, end)) in ranges.iter().enumerate() {
        if end <= start {
            return Err(CutError::EmptyRange { index });
        }
    }
    if transitions.len() != ranges.len() - 1 {
        return Err(CutError::TransitionArity {
            ranges: ranges.len(),
            expected: ranges.len() - 1,
            actual: transitions.len(),
        });
    }

    let has_real_transition = transitions.iter().any(Option::is_some);
    if cut_type == CutType::Fast && (has_real_transition || crop.is_some()) {
        return Err(CutError::FastCutUnsupported);
    }

    for (index, transition) in transitions.iter().enumerate() {
        let Some(transition) = transition else {
            continue;
        };
        if transition.duration <= 0.0 || !transition.duration.is_finite() {
            return Err(CutError::NonPositiveTransition {
                index,
                duration: transition.duration,
            });
        }
        // The overlap eats into the tail of range[index] and the head of
        // range[index + 1]; it must fit in both.
        let before = range_seconds(ranges[index]);
        let after = range_seconds(ranges[index + 1]);
        let shorter = before.min(after);
        if transition.duration > shorter {
            return Err(CutError::TransitionTooLong {
                index,
                duration: transition.duration,
                shorter,
            });
        }
    }

    Ok(())
}

fn range_seconds((start, end): (DateTime<Utc>, DateTime<Utc>)) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 9, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn fade(duration: f64) -> Option<Transition> {
        Some(Transition {
            kind: TransitionKind::Fade,
            duration,
        })
    }

    #[test]
    fn accepts_single_range_no_transitions() {
        validate_cut(&[(t(0), t(10))], &[], CutType::Smart, None).unwrap();
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(
            validate_cut(&[], &[], CutType::Smart, None),
            Err(CutError::NoRanges)
        ));
        assert!(matches!(
            validate_cut(&[(t(5), t(5))], &[], CutType::Smart, None),
            Err(CutError::EmptyRange { index: 0 })
        ));
    }

    #[test]
    fn enforces_transition_arity() {
        let ranges = [(t(0), t(4)), (t(6), t(10))];
        assert!(matches!(
            validate_cut(&ranges, &[], CutType::Smart, None),
            Err(CutError::TransitionArity {
                ranges: 2,
                expected: 1,
                actual: 0
            })
        ));
        validate_cut(&ranges, &[None], CutType::Smart, None).unwrap();
        validate_cut(&ranges, &[fade(1.0)], CutType::Smart, None).unwrap();
    }

    #[test]
    fn fast_rejects_transitions_and_crop() {
        let ranges = [(t(0), t(4)), (t(6), t(10))];
        assert!(matches!(
            validate_cut(&ranges, &[fade(1.0)], CutType::Fast, None),
            Err(CutError::FastCutUnsupported)
        ));
        // Null transitions (hard cuts) are fine in fast mode.
        validate_cut(&ranges, &[None], CutType::Fast, None).unwrap();

        let crop = Rect {
            x: 0,
            y: 0,
            width: 100,
            height: 100,
        };
        assert!(matches!(
            validate_cut(&[(t(0), t(4))], &[], CutType::Fast, Some(crop)),
            Err(CutError::FastCutUnsupported)
        ));
    }

    #[test]
    fn transition_must_fit_both_ranges() {
        let ranges = [(t(0), t(2)), (t(6), t(16))];
        assert!(matches!(
            validate_cut(&ranges, &[fade(3.0)], CutType::Full, None),
            Err(CutError::TransitionTooLong { index: 0, .. })
        ));
        validate_cut(&ranges, &[fade(2.0)], CutType::Full, None).unwrap();

        assert!(matches!(
            validate_cut(&ranges, &[fade(0.0)], CutType::Full, None),
            Err(CutError::NonPositiveTransition { .. })
        ));
    }

    #[test]
    fn unknown_transition_name_is_rejected() {
        assert!(matches!(
            TransitionKind::parse("sparkle"),
            Err(CutError::UnknownTransition(_))
        ));
        assert_eq!(
            TransitionKind::parse("wipeleft").unwrap(),
            TransitionKind::WipeLeft
        );
    }
}
