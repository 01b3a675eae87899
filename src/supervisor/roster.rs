//! Best-effort extraction of the connected-player roster.
//!
//! The server answers `list` with a line such as
//! `There are 2 of a max of 20 players online: alice, bob`. Nothing
//! guarantees that format, so callers must treat the result as advisory.

use super::output::OutputLine;
use crate::constants::ROSTER_SCAN_LINES;

const ROSTER_MARKER: &str = "players online:";

/// Scans the most recent lines, newest first, for a roster reply.
///
/// Returns `None` when no roster line is found and `Some(vec![])` when the
/// server reports nobody online.
pub fn online_players(lines: &[OutputLine]) -> Option<Vec<String>> {
    lines
        .iter()
        .rev()
        .take(ROSTER_SCAN_LINES)
        .find(|line| line.text.to_ascii_lowercase().contains(ROSTER_MARKER))
        .map(|line| parse_roster(&line.text))
}

fn parse_roster(text: &str) -> Vec<String> {
    // Log prefixes like "[12:00:00 INFO]:" also contain a colon, so split
    // after the marker rather than at the first colon.
    let lower = text.to_ascii_lowercase();
    let Some(pos) = lower.find(ROSTER_MARKER) else {
        return Vec::new();
    };
    let names = &text[pos + ROSTER_MARKER.len()..];
    names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
        .collect()
}
