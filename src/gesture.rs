//! Drag-to-select over the words of a rendered definition.
//!
//! `Idle -> Selecting -> Idle`: pointer-down anchors a selection, entering
//! other words stretches it to the contiguous run between anchor and pointer,
//! and pointer-up emits the phrase. Leaving the container aborts.

use crate::tokenize::Token;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How a selected word is capped when the run is highlighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightCap {
    Single,
    First,
    Middle,
    Last,
}

impl HighlightCap {
    pub fn class_name(&self) -> &'static str {
        match self {
            HighlightCap::Single => "word-selected-single",
            HighlightCap::First => "word-selected-first",
            HighlightCap::Middle => "word-selected-middle",
            HighlightCap::Last => "word-selected-last",
        }
    }
}

/// Pointer input over the word at `index`, or over the word container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "lowercase")]
pub enum PointerEvent {
    Down(usize),
    Enter(usize),
    Up,
    Leave,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionGesture {
    selecting: bool,
    anchor: usize,
    selected: BTreeSet<usize>,
}

impl SelectionGesture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_selecting(&self) -> bool {
        self.selecting
    }

    pub fn selected(&self) -> &BTreeSet<usize> {
        &self.selected
    }

    /// Feeds one pointer event, returning a phrase when a drag completes.
    pub fn handle(&mut self, event: PointerEvent, tokens: &[Token]) -> Option<String> {
        match event {
            PointerEvent::Down(index) => self.pointer_down(index),
            PointerEvent::Enter(index) => self.pointer_enter(index),
            PointerEvent::Up => return self.pointer_up(tokens),
            PointerEvent::Leave => self.pointer_leave(),
        }
        None
    }

    pub fn pointer_down(&mut self, index: usize) {
        self.selecting = true;
        self.anchor = index;
        self.selected = BTreeSet::from([index]);
    }

    pub fn pointer_enter(&mut self, index: usize) {
        if !self.selecting {
            return;
        }
        let start = self.anchor.min(index);
        let end = self.anchor.max(index);
        self.selected = (start..=end).collect();
    }

    /// Finishes the drag, returning the selected words joined by single spaces.
    pub fn pointer_up(&mut self, tokens: &[Token]) -> Option<String> {
        let was_selecting = self.selecting;
        let selected = std::mem::take(&mut self.selected);
        self.selecting = false;
        if !was_selecting || selected.is_empty() {
            return None;
        }
        let phrase = selected
            .iter()
            .filter_map(|&index| tokens.get(index))
            .map(|token| token.word.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        if phrase.is_empty() { None } else { Some(phrase) }
    }

    pub fn pointer_leave(&mut self) {
        self.selecting = false;
        self.selected.clear();
    }

    pub fn cap(&self, index: usize) -> Option<HighlightCap> {
        if !self.selected.contains(&index) {
            return None;
        }
        if self.selected.len() == 1 {
            return Some(HighlightCap::Single);
        }
        let first = self.selected.first().copied();
        let last = self.selected.last().copied();
        Some(if Some(index) == first {
            HighlightCap::First
        } else if Some(index) == last {
            HighlightCap::Last
        } else {
            HighlightCap::Middle
        })
    }

    /// Caps for every selected index, in order.
    pub fn caps(&self) -> Vec<(usize, HighlightCap)> {
        self.selected
            .iter()
            .filter_map(|&index| self.cap(index).map(|cap| (index, cap)))
            .collect()
    }
}
