//! Recently seen now-playing titles.

pub const DEFAULT_HISTORY_CAPACITY: usize = 25;
pub const DEFAULT_MAX_ENTRY_LEN: usize = 127;

/// Fixed-capacity, deduplicating log of stream titles, oldest first.
#[derive(Debug, Clone)]
pub struct MetadataHistory {
    entries: Vec<String>,
    capacity: usize,
    max_entry_len: usize,
}

impl Default for MetadataHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, DEFAULT_MAX_ENTRY_LEN)
    }
}

impl MetadataHistory {
    pub fn new(capacity: usize, max_entry_len: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity + 1),
            capacity,
            max_entry_len,
        }
    }

    /// Rebuild from persisted entries, applying the same rules as `record`.
    pub fn restore<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.entries.clear();
        for entry in entries {
            if !entry.is_empty() {
                self.push(truncate_chars(&entry, self.max_entry_len));
            }
        }
    }

    /// Record a title.  An empty or missing `raw` falls back to `fallback`
    /// (usually the station name).  Returns whether the newest entry changed.
    pub fn record(&mut self, raw: Option<&str>, fallback: &str) -> bool {
        let source = match raw {
            Some(r) if !r.is_empty() => r,
            _ => fallback,
        };
        let entry = truncate_chars(source, self.max_entry_len);
        if self.latest() == entry {
            return false;
        }
        self.push(entry);
        true
    }

    fn push(&mut self, entry: String) {
        self.entries.retain(|e| *e != entry);
        self.entries.push(entry);
        if self.entries.len() > self.capacity {
            let excess = self.entries.len() - self.capacity;
            self.entries.drain(..excess);
        }
    }

    pub fn latest(&self) -> &str {
        self.entries.last().map(String::as_str).unwrap_or("")
    }

    /// Oldest first.
    pub fn all(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}
