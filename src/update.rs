//! Selection of the bytes an update operation needs to rewrite.
//!
//! Each policy compares the stored content of a range with the desired
//! content and produces the write runs (offsets relative to the start of the
//! range) that bring the device up to date. Executing the runs is shared.

use std::ops::Range;

/// Algorithm used by `Eeprom::update_block`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Write each maximal run of differing bytes as its own transfer.
    ///
    /// The reported count is the number of bytes that differed.
    DiffRuns,

    /// Compare in transfer-sized chunks and rewrite any chunk containing a
    /// difference in full, unchanged bytes included.
    ///
    /// The reported count is the number of bytes covered by rewritten
    /// chunks, not the number of bytes that differed.
    BulkChunkCompare,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        UpdatePolicy::DiffRuns
    }
}

impl UpdatePolicy {
    /// Compute the write runs needed to turn `stored` into `desired`.
    ///
    /// `chunk_size` is only used by `BulkChunkCompare`.
    pub fn runs(&self, stored: &[u8], desired: &[u8], chunk_size: usize) -> Vec<Range<usize>> {
        match self {
            UpdatePolicy::DiffRuns => diff_runs(stored, desired),
            UpdatePolicy::BulkChunkCompare => chunk_runs(stored, desired, chunk_size),
        }
    }
}

/// Maximal contiguous runs where `stored` and `desired` differ.
pub fn diff_runs(stored: &[u8], desired: &[u8]) -> Vec<Range<usize>> {
    debug_assert_eq!(stored.len(), desired.len());
    let mut runs = Vec::new();
    let mut start = None;
    for (idx, (old, new)) in stored.iter().zip(desired.iter()).enumerate() {
        match (old != new, start) {
            (true, None) => start = Some(idx),
            (false, Some(s)) => {
                runs.push(s..idx);
                start = None;
            },
            _ => (),
        }
    }
    if let Some(s) = start {
        runs.push(s..desired.len());
    }
    runs
}

/// Whole `chunk_size` chunks in which `stored` and `desired` differ anywhere.
pub fn chunk_runs(stored: &[u8], desired: &[u8], chunk_size: usize) -> Vec<Range<usize>> {
    debug_assert_eq!(stored.len(), desired.len());
    let chunk_size = chunk_size.max(1);
    stored.chunks(chunk_size)
        .zip(desired.chunks(chunk_size))
        .enumerate()
        .filter(|(_, (old, new))| old != new)
        .map(|(idx, (_, new))| {
            let start = idx * chunk_size;
            start..start + new.len()
        })
        .collect()
}

#[test]
fn test_diff_runs() {
    let stored = [0xFF; 10];
    let mut desired = stored;
    desired[5] = 0x42;
    assert_eq!(diff_runs(&stored, &desired), vec![5..6]);

    let desired = [0xFF, 0, 0, 0xFF, 0xFF, 1, 0xFF, 2, 2, 2];
    assert_eq!(diff_runs(&stored, &desired), vec![1..3, 5..6, 7..10]);

    assert!(diff_runs(&stored, &stored).is_empty());
    assert_eq!(diff_runs(&stored, &[0u8; 10]), vec![0..10]);
}

#[test]
fn test_chunk_runs() {
    let stored = [0u8; 10];
    let mut desired = stored;
    desired[5] = 1;
    assert_eq!(chunk_runs(&stored, &desired, 4), vec![4..8]);
    desired[9] = 1;
    assert_eq!(chunk_runs(&stored, &desired, 4), vec![4..8, 8..10]);
    assert!(chunk_runs(&stored, &stored, 4).is_empty());
}

#[test]
fn test_policy_counts_differ() {
    let stored = [0u8; 8];
    let mut desired = stored;
    desired[2] = 9;
    let total = |runs: Vec<Range<usize>>| runs.iter().map(|r| r.len()).sum::<usize>();
    assert_eq!(total(UpdatePolicy::DiffRuns.runs(&stored, &desired, 4)), 1);
    assert_eq!(total(UpdatePolicy::BulkChunkCompare.runs(&stored, &desired, 4)), 4);
}
