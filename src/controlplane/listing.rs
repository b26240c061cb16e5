//! Listing & Pagination Engine
//!
//! The orchestrator returns listings in no particular order, so every page
//! is cut from a freshly filtered listing sorted by id. Tokens are plain
//! decimal offsets into that order; they stay valid only as long as the
//! underlying set does not change between calls.

use crate::domain::ports::SnapshotRecord;
use crate::error::{Error, Result};
use tracing::debug;

/// Records that can be ordered for pagination
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for SnapshotRecord {
    fn key(&self) -> &str {
        &self.id
    }
}

/// One window of a sorted listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Empty when the window reaches the end of the listing
    pub next_token: String,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_token: String::new(),
        }
    }
}

/// Optional snapshot predicates; empty strings mean "not given"
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotFilter<'a> {
    pub snapshot_id: &'a str,
    pub source_volume_id: &'a str,
}

impl SnapshotFilter<'_> {
    pub fn is_empty(&self) -> bool {
        self.snapshot_id.is_empty() && self.source_volume_id.is_empty()
    }

    fn matches(&self, snapshot: &SnapshotRecord) -> bool {
        (self.snapshot_id.is_empty() || snapshot.id == self.snapshot_id)
            && (self.source_volume_id.is_empty() || snapshot.volume_id == self.source_volume_id)
    }

    fn not_found(&self) -> Error {
        let message = match (self.snapshot_id.is_empty(), self.source_volume_id.is_empty()) {
            (true, _) => format!("no snapshot with source volume id {}", self.source_volume_id),
            (false, true) => format!("no snapshot with id {}", self.snapshot_id),
            (false, false) => format!(
                "no snapshot with id {} and source volume id {}",
                self.snapshot_id, self.source_volume_id
            ),
        };
        Error::NotFound(message)
    }
}

/// Apply the filter. An empty result is not-found whenever a predicate
/// was given.
pub fn filter_snapshots(
    snapshots: Vec<SnapshotRecord>,
    filter: SnapshotFilter<'_>,
) -> Result<Vec<SnapshotRecord>> {
    if filter.is_empty() {
        return Ok(snapshots);
    }

    let matched: Vec<_> = snapshots.into_iter().filter(|s| filter.matches(s)).collect();
    if matched.is_empty() {
        return Err(filter.not_found());
    }
    Ok(matched)
}

/// Sort ascending by key, lexicographically
pub fn sort_by_key<T: Keyed>(items: &mut [T]) {
    items.sort_by(|a, b| a.key().cmp(b.key()));
}

/// Parse a starting token into an offset. Empty means the beginning.
pub fn parse_starting_token(token: &str) -> Result<usize> {
    if token.is_empty() {
        return Ok(0);
    }
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidStartingToken {
            token: token.to_string(),
            reason: "not an unsigned decimal".to_string(),
        });
    }
    token
        .parse::<u32>()
        .map(|offset| offset as usize)
        .map_err(|e| Error::InvalidStartingToken {
            token: token.to_string(),
            reason: e.to_string(),
        })
}

/// Cut a page out of an already sorted listing.
///
/// `max_entries == 0` returns everything from the offset on.
pub fn paginate<T>(sorted: Vec<T>, starting_token: &str, max_entries: u32) -> Result<Page<T>> {
    let offset = parse_starting_token(starting_token)?;
    let len = sorted.len();
    if offset >= len {
        return Err(Error::StartingTokenOutOfRange { offset, len });
    }

    let end = offset.saturating_add(max_entries as usize);
    let (window_end, next_token) = if max_entries == 0 || end >= len {
        (len, String::new())
    } else {
        (end, end.to_string())
    };

    debug!(offset, len, window_end, next_token = %next_token, "Paginated listing");

    let items = sorted.into_iter().skip(offset).take(window_end - offset).collect();
    Ok(Page { items, next_token })
}

/// Filter, sort and window a snapshot listing.
///
/// With no predicates and no snapshots at all the result is an empty page,
/// whatever the token says.
pub fn page_snapshots(
    snapshots: Vec<SnapshotRecord>,
    filter: SnapshotFilter<'_>,
    starting_token: &str,
    max_entries: u32,
) -> Result<Page<SnapshotRecord>> {
    if filter.is_empty() && snapshots.is_empty() {
        return Ok(Page::empty());
    }

    let mut filtered = filter_snapshots(snapshots, filter)?;
    sort_by_key(&mut filtered);
    paginate(filtered, starting_token, max_entries)
}
