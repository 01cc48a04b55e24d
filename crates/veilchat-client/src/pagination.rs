//! Pagination cursor controller.
//!
//! Sans-IO: the pager decides whether a fetch should happen and with which
//! cursor, the caller performs it and reports the page back.
//!
//! ```text
//!  begin_initial ──> fetch(None) ──> complete(Initial) ── jump to newest once
//!  begin_older ───> fetch(cursor) ─> complete(Older)   ── restore scroll anchor
//!        │
//!        └─ None while loading, exhausted, or before the initial page
//! ```
//!
//! A failed or abandoned fetch changes nothing but the loading flag.

use veilchat_proto::{Cursor, HistoryPage};

/// Which page a fetch is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// Most recent page; replaces the log
    Initial,
    /// Page before the current head; prepended
    Older,
}

/// A fetch the caller should perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// What the page is for
    pub kind: FetchKind,
    /// `None` for the most recent page
    pub cursor: Option<Cursor>,
}

/// Backward-paging state of one conversation.
#[derive(Debug, Clone, Default)]
pub struct Pager {
    cursor: Option<Cursor>,
    has_more: bool,
    loading: Option<FetchKind>,
    initial_done: bool,
    jump_to_newest: bool,
}

impl Pager {
    /// Pager with nothing loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a fetch is in flight.
    pub fn is_loading(&self) -> bool {
        self.loading.is_some()
    }

    /// Whether older pages may exist.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Cursor for the next older page.
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Start loading the most recent page.
    ///
    /// Supersedes nothing: returns `None` if another fetch is in flight.
    pub fn begin_initial(&mut self) -> Option<PageRequest> {
        if self.loading.is_some() {
            return None;
        }
        self.loading = Some(FetchKind::Initial);
        Some(PageRequest { kind: FetchKind::Initial, cursor: None })
    }

    /// Start loading the next older page.
    ///
    /// Returns `None` (no-op) while loading, once exhausted, or before the
    /// initial page has loaded.
    pub fn begin_older(&mut self) -> Option<PageRequest> {
        if self.loading.is_some() || !self.initial_done || !self.has_more {
            return None;
        }
        self.loading = Some(FetchKind::Older);
        Some(PageRequest { kind: FetchKind::Older, cursor: self.cursor.clone() })
    }

    /// Record a completed fetch.
    ///
    /// Returns `false` and changes nothing if `kind` is not the fetch in
    /// flight.
    pub fn complete(&mut self, kind: FetchKind, page: &HistoryPage) -> bool {
        if self.loading != Some(kind) {
            return false;
        }
        self.loading = None;
        self.cursor = page.next_cursor.clone();
        self.has_more = page.has_more && page.next_cursor.is_some();

        if kind == FetchKind::Initial {
            self.initial_done = true;
            self.jump_to_newest = true;
        }
        true
    }

    /// Clear the loading flag after a failed or cancelled fetch.
    pub fn abandon(&mut self) {
        self.loading = None;
    }

    /// Consume the one-shot "jump to newest" flag set by the initial page.
    pub fn take_jump_to_newest(&mut self) -> bool {
        std::mem::take(&mut self.jump_to_newest)
    }
}

/// Scroll position to keep across content growing at the top.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    content_height: f64,
    scroll_offset: f64,
}

impl ScrollAnchor {
    /// Capture before prepending.
    pub fn capture(content_height: f64, scroll_offset: f64) -> Self {
        Self { content_height, scroll_offset }
    }

    /// Offset that keeps the same content in view after the content grew to
    /// `new_content_height`.
    pub fn restore(&self, new_content_height: f64) -> f64 {
        (self.scroll_offset + (new_content_height - self.content_height)).max(0.0)
    }
}
