//! Cursor-paged history responses.

use serde::{Deserialize, Serialize};

use crate::{MessageEnvelope, ProtocolError, Result};

/// Opaque pagination token marking the boundary of the next older page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl Cursor {
    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of history, newest record first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    /// Records, newest first
    #[serde(rename = "content", default)]
    pub records: Vec<MessageEnvelope>,

    /// Cursor for the next older page, absent when nothing was returned
    #[serde(default)]
    pub next_cursor: Option<Cursor>,

    /// Whether an older page may exist
    #[serde(default)]
    pub has_more: bool,
}

impl HistoryPage {
    /// Build a page from newest-first records fetched with `page_size`.
    ///
    /// `has_more` is set when the page came back full; `cursor_of` extracts
    /// the cursor from the oldest record in the page.
    pub fn from_newest_first(
        records: Vec<MessageEnvelope>,
        page_size: usize,
        cursor_of: impl Fn(&MessageEnvelope) -> Cursor,
    ) -> Self {
        let next_cursor = records.last().map(cursor_of);
        let has_more = !records.is_empty() && records.len() == page_size;
        Self { records, next_cursor, has_more }
    }

    /// Records in chronological order (oldest first).
    pub fn into_chronological(self) -> Vec<MessageEnvelope> {
        let mut records = self.records;
        records.reverse();
        records
    }

    /// Parse a page from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson { reason: e.to_string() })
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::InvalidJson { reason: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, timestamp: u64) -> MessageEnvelope {
        MessageEnvelope {
            id: Some(id.into()),
            sender: "a".into(),
            recipient: "b".into(),
            timestamp,
            ..MessageEnvelope::default()
        }
    }

    fn cursor(envelope: &MessageEnvelope) -> Cursor {
        Cursor(envelope.timestamp.to_string())
    }

    #[test]
    fn full_page_has_more() {
        let page = HistoryPage::from_newest_first(vec![record("3", 30), record("2", 20)], 2, cursor);

        assert!(page.has_more);
        assert_eq!(page.next_cursor, Some(Cursor("20".into())));
    }

    #[test]
    fn short_page_is_exhausted() {
        let page = HistoryPage::from_newest_first(vec![record("1", 10)], 2, cursor);
        assert!(!page.has_more);

        let empty = HistoryPage::from_newest_first(Vec::new(), 2, cursor);
        assert!(!empty.has_more);
        assert_eq!(empty.next_cursor, None);
    }

    #[test]
    fn chronological_reverses_page() {
        let page = HistoryPage::from_newest_first(vec![record("3", 30), record("2", 20)], 5, cursor);
        let ids: Vec<_> = page.into_chronological().into_iter().filter_map(|e| e.id).collect();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[test]
    fn wire_format_matches_cursor_response() {
        let json = r#"{"content":[{"id":"9","sender":"a","recipient":"b"}],"nextCursor":"2024-01-01T00:00:00","hasMore":true}"#;
        let page = HistoryPage::from_json(json).unwrap();

        assert_eq!(page.records.len(), 1);
        assert_eq!(page.next_cursor.as_ref().map(Cursor::as_str), Some("2024-01-01T00:00:00"));
        assert!(page.has_more);
    }
}
