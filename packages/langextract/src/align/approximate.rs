//! Edit-distance window search.
//!
//! Finds the substrings of a haystack closest to a needle in one sweep:
//! a semi-global Levenshtein table (free start, free end) computed column by
//! column, so every end position yields its best window as soon as the column
//! is done. That keeps a usable best-so-far when the deadline hits.

use std::ops::Range;
use std::time::Instant;

/// A scored window, in char indices of the haystack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub start: usize,
    pub end: usize,
    pub distance: usize,
}

/// Search parameters for one sweep.
#[derive(Debug, Clone)]
pub(crate) struct WindowSearch {
    /// Largest edit distance kept
    pub max_edits: usize,

    /// Allowed difference between window length and needle length
    pub tolerance: usize,

    /// Preferred start position, in haystack chars
    pub hint: Option<usize>,

    /// `None` runs the sweep to completion
    pub deadline: Option<Instant>,
}

/// Outcome of a sweep.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchOutcome {
    pub best: Option<Candidate>,
    pub timed_out: bool,
}

/// How often (in columns) the deadline is checked.
const DEADLINE_STRIDE: usize = 64;

impl WindowSearch {
    /// Sweep `haystack[range]` for the best window.
    ///
    /// Candidates rank by `(distance, |start - hint|, start)`.
    pub fn run(&self, needle: &[char], haystack: &[char], range: Range<usize>) -> SearchOutcome {
        let m = needle.len();
        let range = range.start.min(haystack.len())..range.end.min(haystack.len());

        if m == 0 || range.is_empty() {
            return SearchOutcome {
                best: None,
                timed_out: false,
            };
        }

        // prev/cur hold one column of the table: row i = needle prefix of length i.
        // Each cell keeps (distance, window start).
        let mut prev: Vec<(usize, usize)> = (0..=m).map(|i| (i, range.start)).collect();
        let mut cur: Vec<(usize, usize)> = vec![(0, 0); m + 1];
        let mut best: Option<Candidate> = None;

        for (offset, &hay_ch) in haystack[range.clone()].iter().enumerate() {
            let j = range.start + offset + 1;

            if offset % DEADLINE_STRIDE == 0 && self.deadline.is_some_and(|d| Instant::now() >= d) {
                return SearchOutcome {
                    best,
                    timed_out: true,
                };
            }

            cur[0] = (0, j);
            for i in 1..=m {
                let cost = usize::from(needle[i - 1] != hay_ch);
                let diagonal = (prev[i - 1].0 + cost, prev[i - 1].1);
                let skip_needle = (cur[i - 1].0 + 1, cur[i - 1].1);
                let skip_hay = (prev[i].0 + 1, prev[i].1);

                cur[i] = pick(pick(diagonal, skip_needle), skip_hay);
            }

            let (distance, start) = cur[m];
            let len = j - start;
            if distance <= self.max_edits && len > 0 && len.abs_diff(m) <= self.tolerance {
                let candidate = Candidate {
                    start,
                    end: j,
                    distance,
                };
                if best.map_or(true, |b| self.better(&candidate, &b)) {
                    best = Some(candidate);
                }
            }

            std::mem::swap(&mut prev, &mut cur);
        }

        SearchOutcome {
            best,
            timed_out: false,
        }
    }

    fn rank(&self, c: &Candidate) -> (usize, usize, usize) {
        let proximity = self.hint.map_or(0, |h| c.start.abs_diff(h));
        (c.distance, proximity, c.start)
    }

    fn better(&self, a: &Candidate, b: &Candidate) -> bool {
        self.rank(a) < self.rank(b)
    }
}

/// Lower distance wins; on ties the later start (tighter window) wins.
fn pick(a: (usize, usize), b: (usize, usize)) -> (usize, usize) {
    if b.0 < a.0 || (b.0 == a.0 && b.1 > a.1) {
        b
    } else {
        a
    }
}

/// Plain Levenshtein distance.
pub(crate) fn edit_distance(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    prev[b.len()]
}
