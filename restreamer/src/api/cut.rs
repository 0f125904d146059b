//! The cut endpoint: ranges and transitions in, video bytes out.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use tracing::info;

use super::{clean_component, load_segments, parse_timestamp, strip_ext};
use crate::AppState;
use crate::error::ApiError;
use cutting::{
    CutError, CutType, RangeSource, Rect, SourceSegment, Transition, TransitionKind, execute_cut,
    validate_cut,
};
use segments::select::select_segments;

/// Parsed form of the repeated query parameters.
#[derive(Debug)]
pub struct CutParams {
    pub ranges: Vec<(DateTime<Utc>, DateTime<Utc>)>,
    pub transitions: Vec<Option<Transition>>,
    pub cut_type: CutType,
    pub allow_holes: bool,
    pub crop: Option<Rect>,
}

impl CutParams {
    /// Parse `range=`/`transition=`/`type=`/`allow_holes=`/`crop=` pairs.
    ///
    /// `range` is `START,END`; `transition` is empty for a hard cut or
    /// `NAME,SECONDS`. When no `transition` parameter appears at all,
    /// every join defaults to a hard cut.
    pub fn parse(pairs: &[(String, String)]) -> Result<Self, ApiError> {
        let mut ranges = Vec::new();
        let mut transitions: Vec<Option<Transition>> = Vec::new();
        let mut saw_transition = false;
        let mut cut_type = CutType::Smart;
        let mut allow_holes = false;
        let mut crop = None;

        for (key, value) in pairs {
            match key.as_str() {
                "range" => {
                    let (start, end) = value.split_once(',').ok_or_else(|| {
                        ApiError::BadRequest(format!("range {value:?} is not START,END"))
                    })?;
                    ranges.push((
                        parse_timestamp(start.trim(), "range start")?,
                        parse_timestamp(end.trim(), "range end")?,
                    ));
                }
                "transition" => {
                    saw_transition = true;
                    if value.is_empty() {
                        transitions.push(None);
                    } else {
                        let (name, duration) = value.split_once(',').ok_or_else(|| {
                            ApiError::BadRequest(format!(
                                "transition {value:?} is not NAME,SECONDS"
                            ))
                        })?;
                        let kind = TransitionKind::parse(name.trim()).map_err(ApiError::Cut)?;
                        let duration: f64 = duration.trim().parse().map_err(|_| {
                            ApiError::BadRequest(format!(
                                "bad transition duration {duration:?}"
                            ))
                        })?;
                        transitions.push(Some(Transition { kind, duration }));
                    }
                }
                "type" => {
                    cut_type = value.parse().map_err(ApiError::BadRequest)?;
                }
                "allow_holes" => {
                    allow_holes = value.parse().map_err(|_| {
                        ApiError::BadRequest(format!("allow_holes {value:?} is not a bool"))
                    })?;
                }
                "crop" => {
                    let parts: Vec<u32> = value
                        .split(',')
                        .map(|p| p.trim().parse())
                        .collect::<Result<_, _>>()
                        .map_err(|_| {
                            ApiError::BadRequest(format!("crop {value:?} is not X,Y,W,H"))
                        })?;
                    let [x, y, width, height] = parts[..] else {
                        return Err(ApiError::BadRequest(format!(
                            "crop {value:?} is not X,Y,W,H"
                        )));
                    };
                    crop = Some(Rect {
                        x,
                        y,
                        width,
                        height,
                    });
                }
                _ => {}
            }
        }

        if !saw_transition && ranges.len() > 1 {
            transitions = vec![None; ranges.len() - 1];
        }

        Ok(Self {
            ranges,
            transitions,
            cut_type,
            allow_holes,
            crop,
        })
    }
}

pub async fn serve(
    State(state): State<AppState>,
    Path((channel, quality)): Path<(String, String)>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let channel = clean_component(&channel, "channel")?.to_string();
    let quality = clean_component(strip_ext(&quality, ".ts"), "quality")?.to_string();

    let params = CutParams::parse(&pairs)?;
    validate_cut(
        &params.ranges,
        &params.transitions,
        params.cut_type,
        params.crop,
    )?;

    let (sources, joins) =
        resolve_sources(&state, &channel, &quality, &params).await?;

    info!(
        channel,
        quality,
        cut_type = params.cut_type.as_str(),
        ranges = sources.len(),
        "Starting cut"
    );
    state
        .metrics
        .inc("cuts_total", &[("type", params.cut_type.as_str())]);

    let stream = execute_cut(
        sources,
        joins,
        params.crop,
        params.cut_type,
        state.token.child_token(),
    );

    let content_type = match params.cut_type {
        CutType::Webm => "video/webm",
        _ => "video/mp2t",
    };
    Ok((
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Select segments for every range and convert to cut inputs.
///
/// With `allow_holes` unset, any uncovered sub-interval fails the whole
/// request before a single byte is produced. With it set, holes are
/// skipped; a range left with no segments at all is dropped, and a join
/// against a dropped range degrades to a hard cut.
///
/// `skip` and `duration` are measured on the spliced timeline the
/// selected segments form when concatenated, so a permitted interior
/// hole shortens the trimmed span instead of pushing the cut past the
/// requested end.
pub async fn resolve_sources(
    state: &AppState,
    channel: &str,
    quality: &str,
    params: &CutParams,
) -> Result<(Vec<RangeSource>, Vec<Option<Transition>>), ApiError> {
    let mut sources = Vec::new();
    let mut joins = Vec::new();
    let mut previous_dropped = false;

    for (index, (start, end)) in params.ranges.iter().enumerate() {
        let available = load_segments(state, channel, quality, *start, *end).await?;
        let selection = select_segments(&available, *start, *end);

        if !params.allow_holes && !selection.holes.is_empty() {
            return Err(CutError::Holes {
                count: selection.holes.len(),
            }
            .into());
        }
        if selection.segments.is_empty() {
            previous_dropped = true;
            continue;
        }

        let skip = selection.concat_offset(*start);
        let duration = (selection.concat_offset(*end) - skip).max(0.0);

        if !sources.is_empty() {
            let join = if previous_dropped {
                None
            } else {
                params.transitions[index - 1]
            };
            joins.push(join);
        }
        sources.push(RangeSource {
            segments: selection
                .segments
                .iter()
                .map(|s| SourceSegment {
                    path: state.base_dir.join(s.rel_path()),
                    duration: s.duration.as_secs_f64(),
                })
                .collect(),
            skip,
            duration,
        });
        previous_dropped = false;
    }

    if sources.is_empty() {
        return Err(CutError::Holes {
            count: params.ranges.len(),
        }
        .into());
    }
    Ok((sources, joins))
}
