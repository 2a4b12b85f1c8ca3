use serde::{Deserialize, Serialize};

/// A node the user drilled away from, kept so back-navigation can replay it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub term: String,
    pub definition: String,
    pub context: String,
}

impl HistoryItem {
    pub fn new(
        term: impl Into<String>,
        definition: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            term: term.into(),
            definition: definition.into(),
            context: context.into(),
        }
    }
}

/// Stack of departed nodes for one popup session.
///
/// Its depth equals the number of forward drills not yet undone by going
/// back. It only empties through `clear` or by popping every item.
#[derive(Debug, Clone, Default)]
pub struct ExplorationHistory {
    items: Vec<HistoryItem>,
}

impl ExplorationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: HistoryItem) {
        self.items.push(item);
    }

    pub fn pop(&mut self) -> Option<HistoryItem> {
        self.items.pop()
    }

    pub fn peek(&self) -> Option<&HistoryItem> {
        self.items.last()
    }

    /// Terms already explored, oldest first.
    pub fn used_terms(&self) -> Vec<String> {
        self.items.iter().map(|item| item.term.clone()).collect()
    }

    /// The term the session started from, once at least one drill happened.
    pub fn original_topic(&self) -> Option<&str> {
        self.items.first().map(|item| item.term.as_str())
    }

    pub fn depth(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryItem> + '_ {
        self.items.iter()
    }
}
