//! Select a word on a page, get a ten-word definition, then keep drilling
//! into the words of that definition and walk back up the trail.
//!
//! The core is synchronous: [`controller::NavigationController`] turns
//! triggers into effects. [`navigator::Navigator`] drives it against a
//! [`navigator::PopupHost`] and a [`fetch::DefinitionFetcher`].

pub mod context;
pub mod controller;
pub mod document;
pub mod fetch;
pub mod gesture;
pub mod history;
pub mod navigator;
pub mod popup;
pub mod prompt;
pub mod selection;
pub mod tokenize;

#[cfg(feature = "web")]
pub mod gemini;
#[cfg(feature = "web")]
pub mod limiter;
#[cfg(feature = "web")]
pub mod web;

pub use context::{ContextMode, DEFAULT_CONTEXT_SIZE, clean_selected_text, extract};
pub use controller::{
    CloseReason, ControllerConfig, Effect, FetchTicket, NavState, NavigationController, Trigger,
};
pub use document::{DocumentCache, DocumentError, DocumentSource, DocumentText, PlainTextSource};
#[cfg(feature = "client")]
pub use fetch::HttpFetcher;
pub use fetch::{ClientConfig, DefinitionFetcher, DefinitionRequest, DefinitionResponse, FetchError};
pub use gesture::{HighlightCap, PointerEvent, SelectionGesture};
pub use history::{ExplorationHistory, HistoryItem};
pub use navigator::{HostEvent, Navigator, PopupHost};
pub use popup::{Popup, PopupId, PopupLayout, PopupPosition, PopupState, Rect, Viewport};
pub use selection::{PageSelection, TextNodeRange, capture_selection, context_menu_selection};
pub use tokenize::{Delimiter, Token, tokenize};
