//! Capped per-role line history

use std::collections::VecDeque;

use super::stream::LineRecord;

/// Ring buffer of the most recent lines for one role
///
/// Oldest lines are evicted once `cap` is reached. Only the control loop
/// touches it, so it needs no locking.
#[derive(Debug)]
pub struct LineBuffer {
    cap: usize,
    lines: VecDeque<LineRecord>,
    /// Lines ever pushed, including evicted ones
    pushed: u64,
}

impl LineBuffer {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            lines: VecDeque::with_capacity(cap),
            pushed: 0,
        }
    }

    /// Append a line, evicting the oldest when full
    pub fn push(&mut self, record: LineRecord) {
        while self.lines.len() >= self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(record);
        self.pushed += 1;
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total lines pushed since creation
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    /// Lines evicted to stay under the cap
    pub fn dropped(&self) -> u64 {
        self.pushed - self.lines.len() as u64
    }

    pub fn iter(&self) -> impl Iterator<Item = &LineRecord> {
        self.lines.iter()
    }

    /// Lines pushed after the first `seen`, limited to what is still held
    pub fn since(&self, seen: u64) -> impl Iterator<Item = &LineRecord> {
        let fresh = self.pushed.saturating_sub(seen).min(self.lines.len() as u64) as usize;
        self.lines.iter().skip(self.lines.len() - fresh)
    }

    /// Text of the last `n` lines, oldest first
    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).map(|r| r.text.clone()).collect()
    }
}
