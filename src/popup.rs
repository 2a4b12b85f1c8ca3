//! Per-instance popup model: geometry, displayed state and word gestures.
//!
//! Every transition creates a fresh [`Popup`]; the superseded one is consumed
//! by [`Popup::dispose`], which only fires the close hook when the session
//! really ends.

use crate::gesture::{HighlightCap, PointerEvent, SelectionGesture};
use crate::history::HistoryItem;
use crate::tokenize::{Token, tokenize};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PopupId(u64);

impl PopupId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for PopupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "popup-{}", self.0)
    }
}

/// A box in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(top: f64, left: f64, width: f64, height: f64) -> Self {
        Self {
            top,
            left,
            width,
            height,
        }
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn center_x(&self) -> f64 {
        self.left + self.width / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub height: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            height: 800.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Above,
    Below,
}

/// Document coordinates of the popup's horizontal center and vertical edge.
///
/// With `Below` the popup hangs down from `y`; with `Above` it sits on `y`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopupPosition {
    pub x: f64,
    pub y: f64,
    pub placement: Placement,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PopupLayout {
    pub margin: f64,
    /// Room needed under a selection before the popup flips above it.
    pub flip_threshold: f64,
    /// Box assumed for a popup until the host measures it.
    pub estimated_width: f64,
    pub estimated_height: f64,
}

impl Default for PopupLayout {
    fn default() -> Self {
        Self {
            margin: 10.0,
            flip_threshold: 200.0,
            estimated_width: 320.0,
            estimated_height: 120.0,
        }
    }
}

impl PopupLayout {
    /// First popup of a session: under the selection, or above it near the viewport bottom.
    pub fn below_selection(&self, selection: Rect, viewport: Viewport) -> PopupPosition {
        let x = selection.center_x() + viewport.scroll_x;
        if selection.bottom() + self.flip_threshold > viewport.height {
            PopupPosition {
                x,
                y: selection.top + viewport.scroll_y - self.margin,
                placement: Placement::Above,
            }
        } else {
            PopupPosition {
                x,
                y: selection.bottom() + viewport.scroll_y + self.margin,
                placement: Placement::Below,
            }
        }
    }

    /// Drill and back popups reuse the box of the popup they replace.
    pub fn at_predecessor(&self, previous: Rect, viewport: Viewport) -> PopupPosition {
        PopupPosition {
            x: previous.center_x() + viewport.scroll_x,
            y: previous.top + viewport.scroll_y,
            placement: Placement::Below,
        }
    }

    /// Viewport box a popup at `position` is expected to cover.
    pub fn estimated_rect(&self, position: PopupPosition, viewport: Viewport) -> Rect {
        let top = match position.placement {
            Placement::Below => position.y - viewport.scroll_y,
            Placement::Above => position.y - viewport.scroll_y - self.estimated_height,
        };
        Rect::new(
            top,
            position.x - viewport.scroll_x - self.estimated_width / 2.0,
            self.estimated_width,
            self.estimated_height,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PopupState {
    Loading {
        term: String,
    },
    Defined {
        term: String,
        definition: String,
        tokens: Vec<Token>,
    },
    Error {
        term: String,
        message: String,
    },
}

impl PopupState {
    pub fn term(&self) -> &str {
        match self {
            PopupState::Loading { term }
            | PopupState::Defined { term, .. }
            | PopupState::Error { term, .. } => term,
        }
    }
}

/// What disposing a popup did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposal {
    pub popup: PopupId,
    /// The close hook fired, so the session is over.
    pub closed: bool,
}

#[derive(Debug)]
pub struct Popup {
    id: PopupId,
    position: PopupPosition,
    rect: Rect,
    show_back: bool,
    context: String,
    state: PopupState,
    gesture: SelectionGesture,
}

impl Popup {
    pub(crate) fn loading(
        id: PopupId,
        position: PopupPosition,
        rect: Rect,
        term: impl Into<String>,
        context: impl Into<String>,
        show_back: bool,
    ) -> Self {
        Self {
            id,
            position,
            rect,
            show_back,
            context: context.into(),
            state: PopupState::Loading { term: term.into() },
            gesture: SelectionGesture::new(),
        }
    }

    /// A popup that opens already defined, replaying a history item.
    pub(crate) fn replay(
        id: PopupId,
        position: PopupPosition,
        rect: Rect,
        item: HistoryItem,
        show_back: bool,
    ) -> Self {
        let mut popup = Self::loading(id, position, rect, item.term, item.context, show_back);
        popup.show_definition(item.definition);
        popup
    }

    pub fn id(&self) -> PopupId {
        self.id
    }

    pub fn state(&self) -> &PopupState {
        &self.state
    }

    pub fn term(&self) -> &str {
        self.state.term()
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn show_back(&self) -> bool {
        self.show_back
    }

    pub fn position(&self) -> PopupPosition {
        self.position
    }

    /// The box the next popup of this session anchors to.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, PopupState::Loading { .. })
    }

    pub fn tokens(&self) -> &[Token] {
        match &self.state {
            PopupState::Defined { tokens, .. } => tokens,
            _ => &[],
        }
    }

    pub(crate) fn set_rect(&mut self, rect: Rect) {
        self.rect = rect;
    }

    pub(crate) fn show_definition(&mut self, definition: String) {
        let term = self.term().to_string();
        self.gesture = SelectionGesture::new();
        self.state = PopupState::Defined {
            term,
            tokens: tokenize(&definition),
            definition,
        };
    }

    pub(crate) fn show_error(&mut self, message: String) {
        let term = self.term().to_string();
        self.gesture = SelectionGesture::new();
        self.state = PopupState::Error { term, message };
    }

    /// Routes pointer input to the word gesture; only defined popups have words.
    pub(crate) fn pointer(&mut self, event: PointerEvent) -> Option<String> {
        let PopupState::Defined { tokens, .. } = &self.state else {
            return None;
        };
        self.gesture.handle(event, tokens)
    }

    pub fn highlight(&self) -> Vec<(usize, HighlightCap)> {
        self.gesture.caps()
    }

    /// The node to remember when drilling away from this popup.
    pub fn departure(&self) -> Option<HistoryItem> {
        match &self.state {
            PopupState::Defined {
                term, definition, ..
            } => Some(HistoryItem::new(
                term.clone(),
                definition.clone(),
                self.context.clone(),
            )),
            _ => None,
        }
    }

    pub fn dispose(self, invoke_close: bool) -> Disposal {
        Disposal {
            popup: self.id,
            closed: invoke_close,
        }
    }

    pub fn snapshot(&self) -> PopupSnapshot {
        PopupSnapshot {
            id: self.id,
            position: self.position,
            show_back: self.show_back,
            context: self.context.clone(),
            state: self.state.clone(),
        }
    }
}

/// Serializable view of a live popup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopupSnapshot {
    pub id: PopupId,
    pub position: PopupPosition,
    pub show_back: bool,
    pub context: String,
    #[serde(flatten)]
    pub state: PopupState,
}
