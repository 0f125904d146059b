//! Minimal MPEG-TS duration probe.
//!
//! Scans 188-byte transport packets for video PES headers and measures
//! the PTS span. This is not a demuxer: no PAT/PMT handling, no payload
//! reassembly. It exists so the downloader can cross-check a playlist's
//! advertised duration against what actually arrived.

const PACKET_SIZE: usize = 188;
const SYNC_BYTE: u8 = 0x47;
const PTS_CLOCK_HZ: f64 = 90_000.0;
const PTS_WRAP: u64 = 1 << 33;

/// Measure the duration of an MPEG-TS blob from its video PTS span.
///
/// Returns the span between the first and last presentation timestamp
/// plus one average frame interval, in seconds. `None` when fewer than
/// two video timestamps are found (e.g. truncated or non-TS data).
pub fn probe_duration(data: &[u8]) -> Option<f64> {
    let mut first_pts: Option<u64> = None;
    let mut last_pts: Option<u64> = None;
    let mut pts_count: u64 = 0;

    for packet in data.chunks_exact(PACKET_SIZE) {
        if packet[0] != SYNC_BYTE {
            // Out of sync; a real demuxer would resync, for a probe we
            // just stop trusting the rest.
            break;
        }
        let payload_unit_start = packet[1] & 0x40 != 0;
        if !payload_unit_start {
            continue;
        }

        let adaptation_field_control = (packet[3] >> 4) & 0x03;
        let payload_offset = match adaptation_field_control {
            0b01 => 4,
            0b11 => {
                let adaptation_len = packet[4] as usize;
                4 + 1 + adaptation_len
            }
            // No payload (or reserved).
            _ => continue,
        };
        let Some(pts) = parse_pes_pts(&packet[payload_offset.min(PACKET_SIZE)..]) else {
            continue;
        };

        if first_pts.is_none() {
            first_pts = Some(pts);
        }
        last_pts = Some(pts);
        pts_count += 1;
    }

    let (first, last) = (first_pts?, last_pts?);
    if pts_count < 2 {
        return None;
    }

    // 33-bit PTS wraps every ~26.5 hours; segments are seconds long, so a
    // single wrap mid-segment is the only case worth handling.
    let span_ticks = if last >= first {
        last - first
    } else {
        last + PTS_WRAP - first
    };
    let span = span_ticks as f64 / PTS_CLOCK_HZ;

    // The last frame still plays for one interval after its PTS.
    let frame_interval = span / (pts_count - 1) as f64;
    Some(span + frame_interval)
}

/// Extract the PTS from the start of a PES packet, if the payload begins
/// with a video PES header carrying one.
fn parse_pes_pts(payload: &[u8]) -> Option<u64> {
    if payload.len() < 14 {
        return None;
    }
    if payload[0] != 0x00 || payload[1] != 0x00 || payload[2] != 0x01 {
        return None;
    }
    let stream_id = payload[3];
    if !(0xE0..=0xEF).contains(&stream_id) {
        return None;
    }
    // PES header: marker '10' in bits 7-6, PTS_DTS_flags in byte 7.
    if payload[6] & 0xC0 != 0x80 {
        return None;
    }
    let pts_dts_flags = (payload[7] >> 6) & 0x03;
    if pts_dts_flags & 0x02 == 0 {
        return None;
    }

    let b = &payload[9..14];
    let pts = ((b[0] as u64 >> 1) & 0x07) << 30
        | (b[1] as u64) << 22
        | ((b[2] as u64 >> 1) & 0x7F) << 15
        | (b[3] as u64) << 7
        | (b[4] as u64 >> 1) & 0x7F;
    Some(pts)
}
