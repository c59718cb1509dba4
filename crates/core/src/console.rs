//! Bounded engine console buffer.

use std::collections::VecDeque;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Maximum number of console lines retained per project.
pub const CONSOLE_CAPACITY: usize = 100;

/// Number of trailing lines sent with each progress event.
pub const RECENT_LINES_IN_EVENT: usize = 5;

/// Most recent engine log lines, oldest first.
///
/// Holds at most [`CONSOLE_CAPACITY`] entries; pushing past the limit
/// evicts from the front so insertion order is always preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleOutput {
    lines: VecDeque<String>,
}

impl ConsoleOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append lines in order, evicting the oldest past capacity.
    pub fn extend<I>(&mut self, lines: I)
    where
        I: IntoIterator<Item = String>,
    {
        for line in lines {
            if self.lines.len() == CONSOLE_CAPACITY {
                self.lines.pop_front();
            }
            self.lines.push_back(line);
        }
    }

    /// The last `n` lines (fewer if the buffer is shorter), oldest first.
    pub fn recent(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

impl From<Vec<String>> for ConsoleOutput {
    fn from(lines: Vec<String>) -> Self {
        let mut console = Self::new();
        console.extend(lines);
        console
    }
}

impl Serialize for ConsoleOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.lines.iter())
    }
}

impl<'de> Deserialize<'de> for ConsoleOutput {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<String>::deserialize(deserializer).map(Self::from)
    }
}
