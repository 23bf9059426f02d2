//! Parser for the ASCII datagrams emitted by the motion-capture controller.
//!
//! Each datagram is a set of newline-separated records:
//!
//! ```text
//! fr 12345
//! ts 47.210930
//! 6d 2 [0 1.000][-48.7 312.0 820.5 0.0 0.0 0.0][1.0 0.0 0.0 0.0 1.0 0.0 0.0 0.0 1.0] [1 -1.000][...][...]
//! ```
//!
//! A `6d` entry carries body id and tracking quality in its first bracket
//! group, position plus Euler angles in the second, and a row-major 3x3
//! rotation matrix in the third. Quality below zero means the body was not
//! seen this frame. Record types we do not consume (markers, flysticks,
//! hands) are skipped.

use std::collections::BTreeSet;

use cavesync_core::{PoseSnapshot, TrackedBody};

use crate::TrackingError;

/// Ids of every body the controller has ever reported. Bodies missing from
/// the current datagram still appear in the snapshot as untracked, so clients
/// see a stable body list frame over frame.
#[derive(Debug, Default)]
pub struct RoomState {
    known_bodies: BTreeSet<i32>,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Parse one datagram into a pose snapshot, folding newly seen body ids into
/// `state`.
pub fn parse_datagram(datagram: &str, state: &mut RoomState) -> Result<PoseSnapshot, TrackingError> {
    let mut frame = 0u64;
    let mut time = 0.0f64;
    let mut seen: Vec<TrackedBody> = Vec::new();

    for line in datagram.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));
        match keyword {
            "fr" => frame = rest.trim().parse().map_err(|_| malformed("fr", line))?,
            "ts" => time = rest.trim().parse().map_err(|_| malformed("ts", line))?,
            "6d" => seen = parse_bodies(rest)?,
            _ => {}
        }
    }

    for body in &seen {
        state.known_bodies.insert(body.id);
    }

    // Every known body appears in every snapshot, unseen ones as untracked.
    let mut bodies: Vec<TrackedBody> = state
        .known_bodies
        .iter()
        .map(|id| TrackedBody::untracked(*id))
        .collect();
    for body in seen {
        if let Some(slot) = bodies.iter_mut().find(|b| b.id == body.id) {
            *slot = body;
        }
    }

    Ok(PoseSnapshot { frame, time, bodies })
}

fn parse_bodies(rest: &str) -> Result<Vec<TrackedBody>, TrackingError> {
    let rest = rest.trim();
    let (count_str, groups_str) = rest.split_once(' ').unwrap_or((rest, ""));
    let count: usize = count_str.parse().map_err(|_| malformed("6d count", rest))?;

    let groups = bracket_groups(groups_str)?;
    if groups.len() != count * 3 {
        return Err(TrackingError::Parse(format!(
            "expected {} bracket groups for {count} bodies, found {}",
            count * 3,
            groups.len()
        )));
    }

    let mut bodies = Vec::with_capacity(count);
    for chunk in groups.chunks(3) {
        let header = floats(chunk[0])?;
        if header.len() < 2 {
            return Err(malformed("6d body header", chunk[0]));
        }
        let id = header[0] as i32;
        let quality = header[1];
        if quality < 0.0 {
            bodies.push(TrackedBody::untracked(id));
            continue;
        }

        let loc = floats(chunk[1])?;
        if loc.len() < 3 {
            return Err(malformed("6d body location", chunk[1]));
        }
        let rot = floats(chunk[2])?;
        if rot.len() != 9 {
            return Err(malformed("6d body rotation", chunk[2]));
        }
        let mut orientation = [0.0; 9];
        orientation.copy_from_slice(&rot);

        bodies.push(TrackedBody {
            id,
            is_tracked: true,
            position: Some([loc[0], loc[1], loc[2]]),
            orientation: Some(orientation),
        });
    }
    Ok(bodies)
}

/// Split `[a b c][d e f]...` into the contents of each bracket pair.
fn bracket_groups(s: &str) -> Result<Vec<&str>, TrackingError> {
    let mut groups = Vec::new();
    let mut rest = s.trim();
    while !rest.is_empty() {
        let Some(open) = rest.find('[') else {
            return Err(TrackingError::Parse(format!("expected '[' in {rest:?}")));
        };
        let Some(close) = rest[open..].find(']') else {
            return Err(TrackingError::Parse("unterminated bracket group".into()));
        };
        groups.push(&rest[open + 1..open + close]);
        rest = rest[open + close + 1..].trim_start();
    }
    Ok(groups)
}

fn floats(group: &str) -> Result<Vec<f64>, TrackingError> {
    group
        .split_whitespace()
        .map(|tok| {
            tok.parse::<f64>()
                .map_err(|_| TrackingError::Parse(format!("bad number {tok:?}")))
        })
        .collect()
}

fn malformed(record: &str, content: &str) -> TrackingError {
    TrackingError::Parse(format!("malformed {record} record: {content:?}"))
}
