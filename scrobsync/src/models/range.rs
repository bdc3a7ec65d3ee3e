//! Offset pagination shared by every listing and aggregate query

use serde::{Deserialize, Serialize};

/// Requested window: skip `offset` items, return at most `size`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub offset: u64,
    pub size: u64,
}

impl Range {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Window following this one
    pub fn next(&self) -> Self {
        Self {
            offset: self.offset.saturating_add(self.size),
            size: self.size,
        }
    }

    /// `LIMIT` to request: one extra row tells whether more results exist
    pub(crate) fn sql_limit(&self) -> i64 {
        i64::try_from(self.size.saturating_add(1)).unwrap_or(i64::MAX)
    }

    pub(crate) fn sql_offset(&self) -> i64 {
        i64::try_from(self.offset).unwrap_or(i64::MAX)
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeResults<T> {
    pub range: Range,
    pub results: Vec<T>,
    /// True when items exist beyond this page
    pub more_results: bool,
}

impl<T> RangeResults<T> {
    /// Build a page from rows fetched with [`Range::sql_limit`]
    pub(crate) fn from_fetched(range: Range, mut rows: Vec<T>) -> Self {
        let size = usize::try_from(range.size).unwrap_or(usize::MAX);
        let more_results = rows.len() > size;
        rows.truncate(size);

        Self {
            range,
            results: rows,
            more_results,
        }
    }

    pub fn map<U, F>(self, f: F) -> RangeResults<U>
    where
        F: FnMut(T) -> U,
    {
        RangeResults {
            range: self.range,
            results: self.results.into_iter().map(f).collect(),
            more_results: self.more_results,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
