//! Viewer-side ordered, bounded Message buffer.
//!
//! # Insert Rules
//! - Stopped: the batch is ignored
//! - `recording == false`: the Message is skipped
//! - Known sequence number: replaced in place, except that a `NO_RESPONSE`
//!   Message never overwrites an existing entry
//! - New sequence number: inserted at its binary-searched position
//! - Overflow: a new entry that would push the live buffer past `limit`
//!   first seals the buffer (exactly `limit` entries) into a [`Tab`]; the
//!   entry then starts the fresh buffer. Nothing is dropped, and later
//!   replacements for sealed sequence numbers update their tab.
//!
//! # Visibility Cache
//! Each entry caches whether it is hidden by the display filter or exclude
//! list and whether it matches a breakpoint. The cache is reset whenever the
//! filter, excludes, breakpoints or sort key change and recomputed on read.

use std::cell::Cell;
use std::collections::HashSet;

use crate::breakpoint::Breakpoint;
use crate::filter::{FilterError, FilterExpression, MatchOptions};
use crate::message::Message;

/// Default live buffer size.
pub const DEFAULT_QUEUE_LIMIT: usize = 50_000;

/// Active ordering of the live buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    /// By `sequenceNumber` (request order).
    #[default]
    Request,
    /// By `sequenceNumberRes` (response order), ties by `sequenceNumber`.
    Response,
}

impl SortKey {
    fn key(&self, message: &Message) -> (u64, u64) {
        match self {
            SortKey::Request => (message.sequence_number, message.sequence_number),
            SortKey::Response => (message.sequence_number_res, message.sequence_number),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visibility {
    Unknown,
    Known { hidden: bool, at_breakpoint: bool },
}

#[derive(Debug, Clone)]
struct Entry {
    message: Message,
    visibility: Cell<Visibility>,
}

impl Entry {
    fn new(message: Message) -> Self {
        Self {
            message,
            visibility: Cell::new(Visibility::Unknown),
        }
    }
}

/// A sealed buffer, kept in request order.
#[derive(Debug, Clone, Default)]
pub struct Tab {
    messages: Vec<Message>,
}

impl Tab {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn position(&self, seq: u64) -> Option<usize> {
        self.messages
            .binary_search_by_key(&seq, |m| m.sequence_number)
            .ok()
    }
}

/// Counts from one `insert_batch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub inserted: usize,
    pub replaced: usize,
    /// `NO_RESPONSE` arrivals that left a known entry untouched.
    pub kept: usize,
    /// Messages whose route is not recording.
    pub skipped: usize,
    /// Whole batch ignored because the queue is stopped.
    pub ignored: usize,
    pub tabs_sealed: usize,
}

/// Sequence-ordered, size-bounded Message buffer.
#[derive(Debug)]
pub struct OrderedMessageQueue {
    limit: usize,
    entries: Vec<Entry>,
    live: HashSet<u64>,
    tabs: Vec<Tab>,
    sort_key: SortKey,
    stopped: bool,
    filter: FilterExpression,
    excludes: Vec<FilterExpression>,
    breakpoints: Vec<FilterExpression>,
}

impl OrderedMessageQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            entries: Vec::new(),
            live: HashSet::new(),
            tabs: Vec::new(),
            sort_key: SortKey::default(),
            stopped: false,
            filter: FilterExpression::empty(),
            excludes: Vec::new(),
            breakpoints: Vec::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn set_stopped(&mut self, stopped: bool) {
        self.stopped = stopped;
    }

    pub fn sort_key(&self) -> SortKey {
        self.sort_key
    }

    /// Live buffer in the active order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|e| &e.message)
    }

    pub fn get(&self, sequence_number: u64) -> Option<&Message> {
        if !self.live.contains(&sequence_number) {
            return None;
        }
        self.locate(sequence_number, (sequence_number, sequence_number))
            .map(|i| &self.entries[i].message)
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.live.clear();
        self.tabs.clear();
    }

    /// Merge a delivered batch into the buffer.
    pub fn insert_batch(&mut self, messages: impl IntoIterator<Item = Message>) -> InsertReport {
        let mut report = InsertReport::default();
        if self.stopped {
            report.ignored = messages.into_iter().count();
            return report;
        }
        for message in messages {
            if !message.proxy_config.recording {
                report.skipped += 1;
                continue;
            }
            self.insert_one(message, &mut report);
        }
        report
    }

    fn insert_one(&mut self, message: Message, report: &mut InsertReport) {
        let seq = message.sequence_number;
        let key = self.sort_key.key(&message);

        if self.live.contains(&seq) {
            if message.response_body.is_no_response() {
                report.kept += 1;
                return;
            }
            let Some(pos) = self.locate(seq, key) else {
                return;
            };
            if self.sort_key.key(&self.entries[pos].message) == key {
                self.entries[pos] = Entry::new(message);
            } else {
                self.entries.remove(pos);
                let at = self.search(key).unwrap_or_else(|i| i);
                self.entries.insert(at, Entry::new(message));
            }
            report.replaced += 1;
            return;
        }

        if let Some((tab, pos)) = self.sealed_position(seq) {
            if message.response_body.is_no_response() {
                report.kept += 1;
            } else {
                self.tabs[tab].messages[pos] = message;
                report.replaced += 1;
            }
            return;
        }

        if self.entries.len() >= self.limit {
            self.seal();
            report.tabs_sealed += 1;
        }
        let at = self.search(key).unwrap_or_else(|i| i);
        self.entries.insert(at, Entry::new(message));
        self.live.insert(seq);
        report.inserted += 1;
    }

    fn search(&self, key: (u64, u64)) -> Result<usize, usize> {
        let sort_key = self.sort_key;
        self.entries
            .binary_search_by(|e| sort_key.key(&e.message).cmp(&key))
    }

    /// Index of the live entry for `seq`. `hint` is the expected sort key.
    fn locate(&self, seq: u64, hint: (u64, u64)) -> Option<usize> {
        if let Ok(i) = self.search(hint) {
            return Some(i);
        }
        // Response order: a request-only entry still sits at (seq, seq).
        if let Ok(i) = self.search((seq, seq)) {
            return Some(i);
        }
        self.entries
            .iter()
            .position(|e| e.message.sequence_number == seq)
    }

    fn sealed_position(&self, seq: u64) -> Option<(usize, usize)> {
        self.tabs
            .iter()
            .enumerate()
            .find_map(|(t, tab)| tab.position(seq).map(|p| (t, p)))
    }

    fn seal(&mut self) {
        let mut messages: Vec<Message> = self.entries.drain(..).map(|e| e.message).collect();
        messages.sort_by_key(|m| m.sequence_number);
        tracing::debug!(messages = messages.len(), tab = self.tabs.len() + 1, "Live buffer sealed into tab");
        self.tabs.push(Tab { messages });
        self.live.clear();
    }

    /// Change the active order. Re-sorts and resets the visibility cache.
    pub fn set_sort_key(&mut self, sort_key: SortKey) {
        if self.sort_key == sort_key {
            return;
        }
        self.sort_key = sort_key;
        self.entries.sort_by_key(|e| sort_key.key(&e.message));
        self.invalidate();
    }

    /// Compile and install the display filter. An invalid filter is
    /// reported and the previous one stays active.
    pub fn set_filter(&mut self, source: &str, options: MatchOptions) -> Result<(), FilterError> {
        self.filter = FilterExpression::compile(source, options)?;
        self.invalidate();
        Ok(())
    }

    pub fn filter(&self) -> &FilterExpression {
        &self.filter
    }

    /// Install the exclude list. All-or-nothing like `set_filter`.
    pub fn set_excludes(&mut self, sources: &[String], options: MatchOptions) -> Result<(), FilterError> {
        let excludes = sources
            .iter()
            .map(|s| FilterExpression::compile(s, options))
            .filter(|r| !matches!(r, Ok(expr) if expr.is_empty()))
            .collect::<Result<Vec<_>, _>>()?;
        self.excludes = excludes;
        self.invalidate();
        Ok(())
    }

    /// Install the enabled breakpoints for `at_breakpoint` flags.
    pub fn set_breakpoints(&mut self, breakpoints: &[Breakpoint]) {
        self.breakpoints = breakpoints
            .iter()
            .filter(|bp| bp.enabled)
            .filter_map(|bp| FilterExpression::compile(&bp.filter, bp.options()).ok())
            .filter(|expr| !expr.is_empty())
            .collect();
        self.invalidate();
    }

    fn invalidate(&self) {
        for entry in &self.entries {
            entry.visibility.set(Visibility::Unknown);
        }
    }

    fn visibility(&self, entry: &Entry) -> (bool, bool) {
        if let Visibility::Known { hidden, at_breakpoint } = entry.visibility.get() {
            return (hidden, at_breakpoint);
        }
        let m = &entry.message;
        let hidden = !self.filter.matches(m) || self.excludes.iter().any(|x| x.matches(m));
        let at_breakpoint = self.breakpoints.iter().any(|bp| bp.matches(m));
        entry.visibility.set(Visibility::Known { hidden, at_breakpoint });
        (hidden, at_breakpoint)
    }

    /// Live Messages that pass the display filter and exclude list.
    pub fn visible(&self) -> Vec<&Message> {
        self.entries
            .iter()
            .filter(|e| !self.visibility(e).0)
            .map(|e| &e.message)
            .collect()
    }

    /// Whether the entry at `index` (active order) is hidden.
    pub fn is_hidden(&self, index: usize) -> Option<bool> {
        self.entries.get(index).map(|e| self.visibility(e).0)
    }

    /// Whether the entry at `index` (active order) matches a breakpoint.
    pub fn at_breakpoint(&self, index: usize) -> Option<bool> {
        self.entries.get(index).map(|e| self.visibility(e).1)
    }

    /// Entries whose visibility is currently cached.
    pub fn cached(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.visibility.get() != Visibility::Unknown)
            .count()
    }
}

impl Default for OrderedMessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_LIMIT)
    }
}
