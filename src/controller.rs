//! The exploration state machine.
//!
//! [`NavigationController::dispatch`] takes one [`Trigger`], mutates the
//! [`ExplorationSession`] and returns the [`Effect`]s the host must carry
//! out. Fetch results come back through [`NavigationController::complete`]
//! tagged with the ticket of the popup that asked, so a response for a
//! superseded popup is dropped instead of rendered.

use crate::fetch::{DefinitionRequest, FetchError};
use crate::gesture::{HighlightCap, PointerEvent};
use crate::history::ExplorationHistory;
use crate::popup::{Popup, PopupId, PopupLayout, PopupPosition, Rect, Viewport};
use crate::tokenize::Token;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

pub const DEFAULT_LOADING_MESSAGE: &str = "Loading...";

/// Everything that can move the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    FreshSelection {
        selected_text: String,
        context: String,
        rect: Rect,
    },
    ContextMenuSelection {
        selected_text: String,
        context: String,
        rect: Rect,
    },
    PhraseSelection {
        popup: PopupId,
        phrase: String,
    },
    BackRequested,
    CloseRequested {
        reason: CloseReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Button,
    OutsideClick,
    Escape,
}

/// Identifies the popup a fetch was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchTicket(PopupId);

impl FetchTicket {
    pub fn popup(&self) -> PopupId {
        self.0
    }
}

impl fmt::Display for FetchTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fetch-for-{}", self.0)
    }
}

/// A command for the host, executed in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ClearPageSelection,
    /// Tear down the popup's surface without running any close hook.
    Remove {
        popup: PopupId,
    },
    Open {
        popup: PopupId,
        position: PopupPosition,
        term: String,
        show_back: bool,
    },
    ShowLoading {
        popup: PopupId,
        message: String,
    },
    ShowDefinition {
        popup: PopupId,
        term: String,
        tokens: Vec<Token>,
        show_back: bool,
    },
    ShowError {
        popup: PopupId,
        message: String,
    },
    Highlight {
        popup: PopupId,
        caps: Vec<(usize, HighlightCap)>,
    },
    Fetch {
        ticket: FetchTicket,
        request: DefinitionRequest,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavState {
    Idle,
    Loading,
    Presenting,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub loading_message: String,
    pub layout: PopupLayout,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            loading_message: DEFAULT_LOADING_MESSAGE.to_string(),
            layout: PopupLayout::default(),
        }
    }
}

/// Mutable state of one popup interaction.
#[derive(Debug, Default)]
pub struct ExplorationSession {
    history: ExplorationHistory,
    live: Option<Popup>,
    in_flight: Option<FetchTicket>,
    next_popup: u64,
}

impl ExplorationSession {
    pub fn history(&self) -> &ExplorationHistory {
        &self.history
    }

    pub fn live_popup(&self) -> Option<&Popup> {
        self.live.as_ref()
    }

    pub fn in_flight(&self) -> Option<FetchTicket> {
        self.in_flight
    }

    fn allocate_id(&mut self) -> PopupId {
        self.next_popup += 1;
        PopupId::new(self.next_popup)
    }
}

#[derive(Debug, Default)]
pub struct NavigationController {
    config: ControllerConfig,
    viewport: Viewport,
    session: ExplorationSession,
}

impl NavigationController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            viewport: Viewport::default(),
            session: ExplorationSession::default(),
        }
    }

    pub fn session(&self) -> &ExplorationSession {
        &self.session
    }

    pub fn history(&self) -> &ExplorationHistory {
        &self.session.history
    }

    pub fn live_popup(&self) -> Option<&Popup> {
        self.session.live.as_ref()
    }

    /// A lookup is in flight; new lookups are dropped until it resolves.
    pub fn is_busy(&self) -> bool {
        self.session.in_flight.is_some()
    }

    pub fn state(&self) -> NavState {
        match &self.session.live {
            None => NavState::Idle,
            Some(popup) if popup.is_loading() => NavState::Loading,
            Some(_) => NavState::Presenting,
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Records the on-screen box the host measured for a popup.
    pub fn measure(&mut self, popup: PopupId, rect: Rect) {
        if let Some(live) = self.session.live.as_mut().filter(|live| live.id() == popup) {
            live.set_rect(rect);
        }
    }

    pub fn dispatch(&mut self, trigger: Trigger) -> Vec<Effect> {
        match trigger {
            Trigger::FreshSelection {
                selected_text,
                context,
                rect,
            } => self.start_session(selected_text, context, rect, "page"),
            Trigger::ContextMenuSelection {
                selected_text,
                context,
                rect,
            } => self.start_session(selected_text, context, rect, "context_menu"),
            Trigger::PhraseSelection { popup, phrase } => self.drill(popup, phrase),
            Trigger::BackRequested => self.go_back(),
            Trigger::CloseRequested { reason } => self.close(reason),
        }
    }

    /// Applies the outcome of the fetch issued under `ticket`.
    pub fn complete(
        &mut self,
        ticket: FetchTicket,
        outcome: Result<String, FetchError>,
    ) -> Vec<Effect> {
        if self.session.in_flight == Some(ticket) {
            self.session.in_flight = None;
        }
        let Some(popup) = self
            .session
            .live
            .as_mut()
            .filter(|live| live.id() == ticket.popup() && live.is_loading())
        else {
            debug!(%ticket, "discarding response for a superseded popup");
            return Vec::new();
        };

        match outcome {
            Ok(definition) => {
                popup.show_definition(definition);
                vec![Effect::ShowDefinition {
                    popup: popup.id(),
                    term: popup.term().to_string(),
                    tokens: popup.tokens().to_vec(),
                    show_back: popup.show_back(),
                }]
            }
            Err(err) => {
                warn!(term = popup.term(), error = %err, "definition lookup failed");
                let message = err.to_string();
                popup.show_error(message.clone());
                vec![Effect::ShowError {
                    popup: popup.id(),
                    message,
                }]
            }
        }
    }

    /// Feeds pointer input on a word of the live popup.
    pub fn pointer(&mut self, popup: PopupId, event: PointerEvent) -> Vec<Effect> {
        let Some(live) = self.session.live.as_mut().filter(|live| live.id() == popup) else {
            return Vec::new();
        };
        if live.tokens().is_empty() {
            return Vec::new();
        }
        let phrase = live.pointer(event);
        let mut effects = vec![Effect::Highlight {
            popup,
            caps: live.highlight(),
        }];
        if let Some(phrase) = phrase {
            effects.extend(self.dispatch(Trigger::PhraseSelection { popup, phrase }));
        }
        effects
    }

    fn start_session(
        &mut self,
        term: String,
        context: String,
        selection: Rect,
        origin: &'static str,
    ) -> Vec<Effect> {
        let term = term.trim().to_string();
        if term.is_empty() {
            return Vec::new();
        }
        if let Some(ticket) = self.session.in_flight {
            debug!(%term, origin, %ticket, "lookup in flight, dropping selection");
            return Vec::new();
        }

        let mut effects = Vec::new();
        self.end_session(&mut effects);
        self.session.history.clear();

        let layout = self.config.layout;
        let position = layout.below_selection(selection, self.viewport);
        let rect = layout.estimated_rect(position, self.viewport);
        info!(%term, origin, "starting exploration session");
        self.open_loading(position, rect, term, context, false, &mut effects);
        effects
    }

    fn drill(&mut self, popup: PopupId, phrase: String) -> Vec<Effect> {
        let phrase = phrase.trim().to_string();
        if phrase.is_empty() {
            return Vec::new();
        }
        if let Some(ticket) = self.session.in_flight {
            debug!(%phrase, %ticket, "lookup in flight, dropping phrase");
            return Vec::new();
        }
        let departure = match &self.session.live {
            Some(live) if live.id() == popup => live.departure(),
            _ => None,
        };
        let Some(departure) = departure else {
            debug!(%popup, %phrase, "phrase did not come from the presented popup");
            return Vec::new();
        };
        let Some(previous) = self.session.live.take() else {
            return Vec::new();
        };

        // The parent goes on the stack before the fetch so going back mid-flight lands on it.
        self.session.history.push(departure);

        let mut effects = Vec::new();
        let anchor = previous.rect();
        supersede(previous, &mut effects);
        let position = self.config.layout.at_predecessor(anchor, self.viewport);
        info!(
            term = %phrase,
            depth = self.session.history.depth(),
            "drilling into phrase"
        );
        self.open_loading(position, anchor, phrase.clone(), phrase, true, &mut effects);
        effects
    }

    fn go_back(&mut self) -> Vec<Effect> {
        if self.session.live.is_none() || self.session.history.is_empty() {
            debug!("nothing to go back to");
            return Vec::new();
        }
        let (Some(previous), Some(item)) = (self.session.live.take(), self.session.history.pop())
        else {
            return Vec::new();
        };

        let mut effects = vec![Effect::ClearPageSelection];
        let anchor = previous.rect();
        supersede(previous, &mut effects);

        let id = self.session.allocate_id();
        let position = self.config.layout.at_predecessor(anchor, self.viewport);
        let show_back = !self.session.history.is_empty();
        let popup = Popup::replay(id, position, anchor, item, show_back);
        debug!(
            term = popup.term(),
            depth = self.session.history.depth(),
            "replaying cached definition"
        );
        effects.push(Effect::Open {
            popup: id,
            position,
            term: popup.term().to_string(),
            show_back,
        });
        effects.push(Effect::ShowDefinition {
            popup: id,
            term: popup.term().to_string(),
            tokens: popup.tokens().to_vec(),
            show_back,
        });
        self.session.live = Some(popup);
        effects
    }

    fn close(&mut self, reason: CloseReason) -> Vec<Effect> {
        self.session.in_flight = None;
        if self.session.live.is_none() {
            self.session.history.clear();
            return Vec::new();
        }
        let mut effects = vec![Effect::ClearPageSelection];
        self.end_session(&mut effects);
        info!(?reason, "exploration session closed");
        effects
    }

    /// Disposes the live popup with its close hook, which empties the history.
    fn end_session(&mut self, effects: &mut Vec<Effect>) {
        let Some(popup) = self.session.live.take() else {
            return;
        };
        let disposal = popup.dispose(true);
        if disposal.closed {
            self.session.history.clear();
        }
        effects.push(Effect::Remove {
            popup: disposal.popup,
        });
    }

    fn open_loading(
        &mut self,
        position: PopupPosition,
        rect: Rect,
        term: String,
        context: String,
        show_back: bool,
        effects: &mut Vec<Effect>,
    ) {
        let id = self.session.allocate_id();
        let ticket = FetchTicket(id);
        let request = DefinitionRequest::new(
            term.clone(),
            context.clone(),
            self.session.history.used_terms(),
        );
        effects.push(Effect::Open {
            popup: id,
            position,
            term: term.clone(),
            show_back,
        });
        effects.push(Effect::ShowLoading {
            popup: id,
            message: self.config.loading_message.clone(),
        });
        effects.push(Effect::Fetch { ticket, request });
        self.session.live = Some(Popup::loading(id, position, rect, term, context, show_back));
        self.session.in_flight = Some(ticket);
    }
}

/// Replaces a popup mid-session; the history must survive, so no close hook.
fn supersede(popup: Popup, effects: &mut Vec<Effect>) {
    let disposal = popup.dispose(false);
    effects.push(Effect::Remove {
        popup: disposal.popup,
    });
}
