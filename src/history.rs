use std::collections::VecDeque;
use std::io::{self, Write};

/// Bounded, append-only log of entered lines.
///
/// Once `capacity` entries are stored, each new entry evicts the oldest one. Every entry
/// keeps the 1-based number it was assigned on insertion, so numbering stays stable after
/// wraparound: with capacity 100, the 150th line is still shown as `150`.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<String>,
    capacity: usize,
    total: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            total: 0,
        }
    }

    /// Record a completed line.
    pub fn push(&mut self, line: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(line.into());
        self.total += 1;
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of lines ever recorded, including evicted ones.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Retained entry at `index`, where 0 is the oldest retained entry.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    /// Retained entries oldest-first, paired with their logical (1-based) number.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        let first = self.total - self.entries.len() + 1;
        self.entries
            .iter()
            .enumerate()
            .map(move |(i, line)| (first + i, line.as_str()))
    }

    /// Owned copy of the retained entries, oldest-first. The line editor navigates this
    /// snapshot so the store itself is never locked while waiting on a keystroke.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    /// Print the most recent `count` entries as `  <number>  <line>`.
    pub fn display(&self, count: usize, out: &mut dyn Write) -> io::Result<()> {
        let skip = self.entries.len().saturating_sub(count);
        for (number, line) in self.iter().skip(skip) {
            writeln!(out, "  {}  {}", number, line)?;
        }
        Ok(())
    }
}
