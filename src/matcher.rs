//! Protect-list matching.
//!
//! The protect list is a raw, comma-separated configuration string such as
//! `"postgres, template0 ,template1"`. It is re-read and re-scanned on every
//! check so that a reload takes effect on the next statement; nothing parsed
//! is kept between calls.
//!
//! # Scanning rules
//!
//! - Whitespace (space, `\t`, `\n`, `\v`, `\f`, `\r`) is dropped everywhere,
//!   including inside a name: `"post gres"` lists `postgres`.
//! - A comma ends the current entry. Empty entries never match.
//! - `ALL` (any case) protects every database.
//! - An entry longer than [`MAX_NAME_LEN`] bytes is abandoned and the scan
//!   skips verbatim to the next comma, so it can neither overflow the entry
//!   buffer nor bleed into the entry that follows it.
//!
//! Names compare with ASCII case folding, the same way the server compares
//! identifiers with `pg_strcasecmp`.

use std::ops::Range;

use smallvec::SmallVec;

/// Longest database name the server accepts (`NAMEDATALEN - 1`).
pub const MAX_NAME_LEN: usize = 63;

/// Sentinel entry that protects every database.
pub const ALL_SENTINEL: &str = "ALL";

const SEPARATOR: u8 = b',';

/// Inline buffer for one entry; never spills because appends are bounded.
pub type NameBuf = SmallVec<[u8; MAX_NAME_LEN + 1]>;

#[inline]
const fn is_list_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r')
}

/// Bounded accumulator for a single list entry.
///
/// `push` refuses any byte that would take the entry past [`MAX_NAME_LEN`].
#[derive(Debug, Default, Clone)]
struct EntryBuffer {
    bytes: NameBuf,
}

impl EntryBuffer {
    /// Append a byte, or return `false` if the entry would become too long.
    #[inline]
    fn push(&mut self, b: u8) -> bool {
        if self.bytes.len() >= MAX_NAME_LEN {
            return false;
        }
        self.bytes.push(b);
        true
    }

    #[inline]
    fn take(&mut self) -> NameBuf {
        std::mem::take(&mut self.bytes)
    }

    #[inline]
    fn clear(&mut self) {
        self.bytes.clear();
    }
}

/// One comma-delimited segment of the protect list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    /// A usable entry with whitespace removed.
    Name {
        /// Entry bytes (valid UTF-8 whenever the list is).
        name: NameBuf,
        /// Byte range of the raw segment in the list.
        span: Range<usize>,
    },
    /// Segment longer than [`MAX_NAME_LEN`]; skipped.
    Oversized { span: Range<usize> },
    /// Segment with nothing but whitespace.
    Empty { span: Range<usize> },
}

impl ListEntry {
    /// The entry text, if this is a usable name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Name { name, .. } => std::str::from_utf8(name).ok(),
            Self::Oversized { .. } | Self::Empty { .. } => None,
        }
    }

    /// Byte range of the raw segment in the list.
    #[must_use]
    pub fn span(&self) -> Range<usize> {
        match self {
            Self::Name { span, .. } | Self::Oversized { span } | Self::Empty { span } => {
                span.clone()
            }
        }
    }

    /// True for the `ALL` sentinel.
    #[must_use]
    pub fn is_all(&self) -> bool {
        match self {
            Self::Name { name, .. } => name.eq_ignore_ascii_case(ALL_SENTINEL.as_bytes()),
            Self::Oversized { .. } | Self::Empty { .. } => false,
        }
    }

    /// Whether this entry protects `candidate`.
    #[must_use]
    pub fn protects(&self, candidate: &str) -> bool {
        match self {
            Self::Name { name, .. } => {
                name.eq_ignore_ascii_case(candidate.as_bytes())
                    || name.eq_ignore_ascii_case(ALL_SENTINEL.as_bytes())
            }
            Self::Oversized { .. } | Self::Empty { .. } => false,
        }
    }
}

/// Iterator over the segments of a protect list. See [`scan`].
#[derive(Debug, Clone)]
pub struct ListScanner<'a> {
    list: &'a [u8],
    pos: usize,
    buf: EntryBuffer,
    done: bool,
}

impl<'a> ListScanner<'a> {
    fn new(list: &'a str) -> Self {
        Self {
            list: list.as_bytes(),
            pos: 0,
            buf: EntryBuffer::default(),
            done: false,
        }
    }

    fn finish(&mut self, start: usize, end: usize) -> ListEntry {
        let name = self.buf.take();
        let span = start..end;
        if name.is_empty() {
            ListEntry::Empty { span }
        } else {
            ListEntry::Name { name, span }
        }
    }
}

impl Iterator for ListScanner<'_> {
    type Item = ListEntry;

    fn next(&mut self) -> Option<ListEntry> {
        if self.done {
            return None;
        }
        let start = self.pos;
        while self.pos < self.list.len() {
            let b = self.list[self.pos];
            if b == SEPARATOR {
                let end = self.pos;
                self.pos += 1;
                return Some(self.finish(start, end));
            }
            self.pos += 1;
            if is_list_whitespace(b) {
                continue;
            }
            if !self.buf.push(b) {
                // Oversized: drop what we have and skip to the next separator.
                self.buf.clear();
                let rest = &self.list[self.pos..];
                return Some(match memchr::memchr(SEPARATOR, rest) {
                    Some(offset) => {
                        let end = self.pos + offset;
                        self.pos = end + 1;
                        ListEntry::Oversized { span: start..end }
                    }
                    None => {
                        self.pos = self.list.len();
                        self.done = true;
                        ListEntry::Oversized {
                            span: start..self.list.len(),
                        }
                    }
                });
            }
        }
        self.done = true;
        // An empty tail (after a trailing comma, or an empty list) is not an entry.
        if self.buf.bytes.is_empty() && start == self.list.len() {
            return None;
        }
        Some(self.finish(start, self.list.len()))
    }
}

/// Scan a protect list into its segments, left to right.
#[must_use]
pub fn scan(list: &str) -> ListScanner<'_> {
    ListScanner::new(list)
}

/// The entry that caused a candidate to be protected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectMatch {
    /// The candidate is listed by name.
    Name(String),
    /// The list contains the `ALL` sentinel.
    All,
}

impl ProtectMatch {
    /// Label suitable for messages and logs.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::All => ALL_SENTINEL,
        }
    }
}

/// Find the first entry of `list` that protects `candidate`.
#[must_use]
pub fn find_match(list: &str, candidate: &str) -> Option<ProtectMatch> {
    scan(list).find_map(|entry| {
        if !entry.protects(candidate) {
            return None;
        }
        // A name equal to the candidate wins over reporting it as the sentinel,
        // so a database literally named "all" is reported by name.
        let name = entry.name().unwrap_or_default();
        if name.eq_ignore_ascii_case(candidate) {
            Some(ProtectMatch::Name(name.to_string()))
        } else {
            Some(ProtectMatch::All)
        }
    })
}

/// Whether `candidate` may not be dropped under `list`.
#[inline]
#[must_use]
pub fn is_protected(list: &str, candidate: &str) -> bool {
    scan(list).any(|entry| entry.protects(candidate))
}
