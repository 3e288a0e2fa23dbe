//! Duration metadata repair for streamed WebM clips.
//!
//! Incremental recorders emit the Segment with no `Duration` element in
//! `Info`, which leaves players unable to seek. After a clip is finalized the
//! measured wall-clock duration is written back into the container here.

use crate::error::{RecorderError, Result};
use log::{debug, warn};

const EBML_HEADER_ID: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const SEGMENT_ID: [u8; 4] = [0x18, 0x53, 0x80, 0x67];
const INFO_ID: [u8; 4] = [0x15, 0x49, 0xA9, 0x66];
const TIMESTAMP_SCALE_ID: [u8; 3] = [0x2A, 0xD7, 0xB1];
const DURATION_ID: [u8; 2] = [0x44, 0x89];

/// Nanoseconds per timestamp tick when the Info carries no explicit scale.
const DEFAULT_TIMESTAMP_SCALE: u64 = 1_000_000;

/// Insert (or rewrite) the `Duration` element so the clip seeks correctly.
///
/// Best-effort by contract: input that is not a WebM/EBML stream is returned
/// unchanged with a warning, since the repair must never invalidate a clip
/// that played fine without it.
pub fn repair_duration(data: &[u8], duration_ms: f64) -> Result<Vec<u8>> {
    if data.len() < 4 || data[..4] != EBML_HEADER_ID {
        warn!("Clip is not an EBML stream, skipping duration repair");
        return Ok(data.to_vec());
    }

    let Some(segment) = find_element(data, 0, data.len(), &SEGMENT_ID) else {
        warn!("No Segment element found, skipping duration repair");
        return Ok(data.to_vec());
    };

    let segment_body_end = match segment.body_size {
        Some(size) => (segment.body_start + size as usize).min(data.len()),
        // Streamed segments are usually unknown-size; the body runs to EOF.
        None => data.len(),
    };

    let Some(info) = find_element(data, segment.body_start, segment_body_end, &INFO_ID) else {
        warn!("No Segment Info element found, skipping duration repair");
        return Ok(data.to_vec());
    };
    let Some(info_size) = info.body_size else {
        warn!("Segment Info has unknown size, skipping duration repair");
        return Ok(data.to_vec());
    };
    let info_body_end = info.body_start + info_size as usize;
    if info_body_end > data.len() {
        return Err(RecorderError::Generic(
            "Segment Info overruns the clip".to_string(),
        ));
    }

    let timestamp_scale = find_element(data, info.body_start, info_body_end, &TIMESTAMP_SCALE_ID)
        .and_then(|e| e.body_size.map(|size| (e.body_start, size)))
        .map(|(start, size)| read_uint(&data[start..start + size as usize]))
        .unwrap_or(DEFAULT_TIMESTAMP_SCALE);

    // Duration is expressed in timestamp-scale ticks.
    let duration_ticks = duration_ms * 1_000_000.0 / timestamp_scale as f64;
    let duration_element = encode_duration_element(duration_ticks);

    // Rebuild the Info body with the old Duration (if any) replaced.
    let old_body = &data[info.body_start..info_body_end];
    let mut new_body = Vec::with_capacity(old_body.len() + duration_element.len());
    match find_element(data, info.body_start, info_body_end, &DURATION_ID) {
        Some(old_duration) => {
            let rel_start = old_duration.element_start - info.body_start;
            let rel_end = old_duration.body_start
                + old_duration.body_size.unwrap_or(0) as usize
                - info.body_start;
            new_body.extend_from_slice(&old_body[..rel_start]);
            new_body.extend_from_slice(&duration_element);
            new_body.extend_from_slice(&old_body[rel_end..]);
            debug!("Rewrote existing Duration element ({} ticks)", duration_ticks);
        }
        None => {
            new_body.extend_from_slice(old_body);
            new_body.extend_from_slice(&duration_element);
            debug!("Inserted Duration element ({} ticks)", duration_ticks);
        }
    }

    let new_info_size = encode_vint(new_body.len() as u64);
    let old_info_total = info_body_end - info.element_start;
    let new_info_total = INFO_ID.len() + new_info_size.len() + new_body.len();
    let delta = new_info_total as i64 - old_info_total as i64;

    let mut out = Vec::with_capacity((data.len() as i64 + delta) as usize);
    out.extend_from_slice(&data[..info.element_start]);
    out.extend_from_slice(&INFO_ID);
    out.extend_from_slice(&new_info_size);
    out.extend_from_slice(&new_body);
    out.extend_from_slice(&data[info_body_end..]);

    // A known-size Segment must account for the grown Info.
    if let Some(old_segment_size) = segment.body_size {
        let new_segment_size = (old_segment_size as i64 + delta) as u64;
        let old_size_field_len = segment.body_start - segment.element_start - SEGMENT_ID.len();
        let new_size_field = encode_vint_with_width(new_segment_size, old_size_field_len)
            .unwrap_or_else(|| encode_vint(new_segment_size));
        let size_field_start = segment.element_start + SEGMENT_ID.len();
        out.splice(
            size_field_start..size_field_start + old_size_field_len,
            new_size_field,
        );
    }

    Ok(out)
}

struct ElementPos {
    element_start: usize,
    body_start: usize,
    /// `None` for unknown-size elements.
    body_size: Option<u64>,
}

/// Scan sibling elements in `data[from..to]` for the given id.
fn find_element(data: &[u8], from: usize, to: usize, id: &[u8]) -> Option<ElementPos> {
    let mut pos = from;
    while pos < to {
        let id_len = vint_length(data.get(pos).copied()?)?;
        if pos + id_len > to {
            return None;
        }
        let element_id = &data[pos..pos + id_len];
        let (size, size_len) = read_size_vint(data, pos + id_len)?;
        let body_start = pos + id_len + size_len;

        if element_id == id {
            return Some(ElementPos {
                element_start: pos,
                body_start,
                body_size: size,
            });
        }

        match size {
            Some(size) => pos = body_start + size as usize,
            // Unknown-size siblings swallow everything that follows.
            None => return None,
        }
    }
    None
}

/// Number of bytes in a vint given its first byte, per the EBML marker bit.
fn vint_length(first: u8) -> Option<usize> {
    if first == 0 {
        return None;
    }
    Some(first.leading_zeros() as usize + 1)
}

/// Read a size vint; `None` size means the reserved all-ones unknown value.
fn read_size_vint(data: &[u8], pos: usize) -> Option<(Option<u64>, usize)> {
    let first = *data.get(pos)?;
    let len = vint_length(first)?;
    if pos + len > data.len() || len > 8 {
        return None;
    }

    let mut value = (first as u64) & ((1 << (8 - len)) - 1);
    for i in 1..len {
        value = (value << 8) | data[pos + i] as u64;
    }

    let unknown = (1u64 << (7 * len)) - 1;
    if value == unknown {
        Some((None, len))
    } else {
        Some((Some(value), len))
    }
}

fn read_uint(data: &[u8]) -> u64 {
    data.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Minimal-width size vint.
fn encode_vint(value: u64) -> Vec<u8> {
    for width in 1..=8usize {
        if let Some(encoded) = encode_vint_with_width(value, width) {
            return encoded;
        }
    }
    unreachable!("size vints cover all u64 values the container can hold");
}

/// Fixed-width size vint, `None` when the value does not fit.
fn encode_vint_with_width(value: u64, width: usize) -> Option<Vec<u8>> {
    if width == 0 || width > 8 {
        return None;
    }
    // The all-ones pattern is reserved for "unknown".
    if value >= (1u64 << (7 * width)) - 1 {
        return None;
    }
    let mut bytes = vec![0u8; width];
    let mut v = value;
    for i in (1..width).rev() {
        bytes[i] = (v & 0xFF) as u8;
        v >>= 8;
    }
    bytes[0] = (v as u8) | (1 << (8 - width));
    Some(bytes)
}

/// `Duration` as an 8-byte big-endian float element.
fn encode_duration_element(ticks: f64) -> Vec<u8> {
    let mut element = Vec::with_capacity(2 + 1 + 8);
    element.extend_from_slice(&DURATION_ID);
    element.extend_from_slice(&encode_vint(8));
    element.extend_from_slice(&ticks.to_be_bytes());
    element
}
