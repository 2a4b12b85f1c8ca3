//! Runs the controller against a real host: renders effects, spawns
//! fetches and feeds their results back in.
//!
//! Every transition goes through `&mut self` on one task, so host input and
//! fetch completions are applied strictly one at a time.

use crate::controller::{Effect, FetchTicket, NavigationController, Trigger};
use crate::fetch::{DefinitionFetcher, DefinitionRequest, FetchError};
use crate::gesture::{HighlightCap, PointerEvent};
use crate::popup::{PopupId, PopupPosition, Rect, Viewport};
use crate::tokenize::Token;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Rendering surface for popups and the page selection.
pub trait PopupHost {
    fn open(&mut self, popup: PopupId, position: PopupPosition, term: &str, show_back: bool);
    fn show_loading(&mut self, popup: PopupId, message: &str);
    fn show_definition(&mut self, popup: PopupId, term: &str, tokens: &[Token], show_back: bool);
    fn show_error(&mut self, popup: PopupId, message: &str);
    fn highlight(&mut self, popup: PopupId, caps: &[(usize, HighlightCap)]);
    fn remove(&mut self, popup: PopupId);
    fn clear_page_selection(&mut self);
}

/// Input coming from the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Trigger(Trigger),
    Pointer { popup: PopupId, event: PointerEvent },
    Measured { popup: PopupId, rect: Rect },
    Viewport(Viewport),
}

impl From<Trigger> for HostEvent {
    fn from(value: Trigger) -> Self {
        HostEvent::Trigger(value)
    }
}

const LOOKUP_FAILED: &str = "Definition lookup failed unexpectedly.";

struct Completion {
    ticket: FetchTicket,
    outcome: Result<String, FetchError>,
}

pub struct Navigator<F: ?Sized, H> {
    controller: NavigationController,
    fetcher: Arc<F>,
    host: H,
    fetches: JoinSet<Completion>,
}

impl<F, H> Navigator<F, H>
where
    F: DefinitionFetcher + ?Sized + 'static,
    H: PopupHost,
{
    pub fn new(controller: NavigationController, fetcher: Arc<F>, host: H) -> Self {
        Self {
            controller,
            fetcher,
            host,
            fetches: JoinSet::new(),
        }
    }

    pub fn controller(&self) -> &NavigationController {
        &self.controller
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Applies one host event. Fetches it starts run in the background.
    pub fn handle(&mut self, event: HostEvent) {
        let effects = match event {
            HostEvent::Trigger(trigger) => self.controller.dispatch(trigger),
            HostEvent::Pointer { popup, event } => self.controller.pointer(popup, event),
            HostEvent::Measured { popup, rect } => {
                self.controller.measure(popup, rect);
                Vec::new()
            }
            HostEvent::Viewport(viewport) => {
                self.controller.set_viewport(viewport);
                Vec::new()
            }
        };
        self.apply(effects);
    }

    /// Waits until no fetch is outstanding, applying each result as it lands.
    pub async fn settle(&mut self) {
        while let Some(joined) = self.fetches.join_next().await {
            self.finish(joined);
        }
    }

    /// Consumes host events until the sender hangs up, then settles.
    pub async fn run(&mut self, mut events: mpsc::Receiver<HostEvent>) {
        loop {
            tokio::select! {
                Some(joined) = self.fetches.join_next(), if !self.fetches.is_empty() => {
                    self.finish(joined);
                }
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }
        self.settle().await;
    }

    fn finish(&mut self, joined: Result<Completion, tokio::task::JoinError>) {
        match joined {
            Ok(Completion { ticket, outcome }) => {
                let effects = self.controller.complete(ticket, outcome);
                self.apply(effects);
            }
            Err(err) => warn!(error = %err, "definition fetch task failed"),
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ClearPageSelection => self.host.clear_page_selection(),
                Effect::Remove { popup } => self.host.remove(popup),
                Effect::Open {
                    popup,
                    position,
                    term,
                    show_back,
                } => self.host.open(popup, position, &term, show_back),
                Effect::ShowLoading { popup, message } => self.host.show_loading(popup, &message),
                Effect::ShowDefinition {
                    popup,
                    term,
                    tokens,
                    show_back,
                } => self.host.show_definition(popup, &term, &tokens, show_back),
                Effect::ShowError { popup, message } => self.host.show_error(popup, &message),
                Effect::Highlight { popup, caps } => self.host.highlight(popup, &caps),
                Effect::Fetch { ticket, request } => self.spawn_fetch(ticket, request),
            }
        }
    }

    fn spawn_fetch(&mut self, ticket: FetchTicket, request: DefinitionRequest) {
        debug!(%ticket, term = %request.selected_text, depth = request.depth(), "spawning fetch");
        let fetcher = Arc::clone(&self.fetcher);
        // The lookup runs in its own task so a panic still yields a completion for its ticket.
        self.fetches.spawn(async move {
            let lookup = tokio::spawn(async move { fetcher.fetch(request).await });
            let outcome = match lookup.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(%ticket, error = %err, "definition lookup aborted");
                    Err(FetchError::Transport(LOOKUP_FAILED.to_string()))
                }
            };
            Completion { ticket, outcome }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{CloseReason, NavState};
    use crate::selection::{TextNodeRange, capture_selection};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use tokio::sync::Notify;

    const PAGE: &str = "Cells need energy. The mitochondria is the powerhouse of the cell. Plants differ.";

    #[derive(Default)]
    struct ScriptedFetcher {
        replies: HashMap<String, String>,
        held: HashSet<String>,
        faulty: HashSet<String>,
        release: Notify,
        requests: Mutex<Vec<DefinitionRequest>>,
    }

    impl ScriptedFetcher {
        fn new(replies: &[(&str, &str)]) -> Self {
            Self {
                replies: replies
                    .iter()
                    .map(|(term, reply)| (term.to_string(), reply.to_string()))
                    .collect(),
                ..Self::default()
            }
        }

        fn holding(mut self, term: &str) -> Self {
            self.held.insert(term.to_string());
            self
        }

        fn failing_hard(mut self, term: &str) -> Self {
            self.faulty.insert(term.to_string());
            self
        }

        fn requests(&self) -> Vec<DefinitionRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl DefinitionFetcher for ScriptedFetcher {
        async fn fetch(&self, request: DefinitionRequest) -> Result<String, FetchError> {
            self.requests.lock().push(request.clone());
            if self.held.contains(&request.selected_text) {
                self.release.notified().await;
            }
            if self.faulty.contains(&request.selected_text) {
                panic!("lookup backend crashed on {}", request.selected_text);
            }
            self.replies
                .get(&request.selected_text)
                .cloned()
                .ok_or_else(|| FetchError::Transport("offline".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        calls: Vec<String>,
    }

    impl PopupHost for RecordingHost {
        fn open(&mut self, popup: PopupId, _position: PopupPosition, term: &str, show_back: bool) {
            self.calls.push(format!("open {popup} {term} back={show_back}"));
        }

        fn show_loading(&mut self, popup: PopupId, message: &str) {
            self.calls.push(format!("loading {popup} {message}"));
        }

        fn show_definition(&mut self, popup: PopupId, term: &str, tokens: &[Token], _show_back: bool) {
            self.calls
                .push(format!("define {popup} {term}: {} words", tokens.len()));
        }

        fn show_error(&mut self, popup: PopupId, message: &str) {
            self.calls.push(format!("error {popup} {message}"));
        }

        fn highlight(&mut self, popup: PopupId, caps: &[(usize, HighlightCap)]) {
            self.calls.push(format!("highlight {popup} {}", caps.len()));
        }

        fn remove(&mut self, popup: PopupId) {
            self.calls.push(format!("remove {popup}"));
        }

        fn clear_page_selection(&mut self) {
            self.calls.push("clear".to_string());
        }
    }

    fn navigator(fetcher: ScriptedFetcher) -> (Arc<ScriptedFetcher>, Navigator<ScriptedFetcher, RecordingHost>) {
        let fetcher = Arc::new(fetcher);
        let navigator = Navigator::new(
            NavigationController::default(),
            Arc::clone(&fetcher),
            RecordingHost::default(),
        );
        (fetcher, navigator)
    }

    fn select_on_page(term: &str) -> HostEvent {
        let start = PAGE.find(term).expect("term on page");
        let selection = capture_selection(
            term,
            Some(TextNodeRange {
                text: PAGE,
                start,
                end: start + term.len(),
            }),
            PAGE,
        )
        .expect("accepted selection");
        Trigger::FreshSelection {
            selected_text: selection.selected_text,
            context: selection.context,
            rect: Rect::new(200.0, 80.0, 90.0, 18.0),
        }
        .into()
    }

    fn drag(navigator: &mut Navigator<ScriptedFetcher, RecordingHost>, from: usize, to: usize) {
        let popup = navigator.controller().live_popup().expect("live popup").id();
        for event in [PointerEvent::Down(from), PointerEvent::Enter(to), PointerEvent::Up] {
            navigator.handle(HostEvent::Pointer { popup, event });
        }
    }

    fn scripted() -> ScriptedFetcher {
        ScriptedFetcher::new(&[
            ("mitochondria", "Organelle producing ATP through respiration."),
            ("ATP", "Molecule storing cellular energy."),
            ("powerhouse", "Main energy source."),
        ])
    }

    #[tokio::test]
    async fn page_selection_sends_sentence_context() {
        let (fetcher, mut navigator) = navigator(scripted());
        navigator.handle(select_on_page("mitochondria"));
        navigator.settle().await;

        let requests = fetcher.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].selected_text, "mitochondria");
        assert_eq!(
            requests[0].context,
            "The mitochondria is the powerhouse of the cell."
        );
        assert!(requests[0].history.is_empty());
        assert_eq!(
            navigator.host().calls,
            vec![
                "open popup-1 mitochondria back=false",
                "loading popup-1 Loading...",
                "define popup-1 mitochondria: 5 words",
            ]
        );
        assert_eq!(navigator.controller().state(), NavState::Presenting);
    }

    #[tokio::test]
    async fn drill_then_back_fetches_once_per_forward_step() {
        let (fetcher, mut navigator) = navigator(scripted());
        navigator.handle(select_on_page("mitochondria"));
        navigator.settle().await;

        drag(&mut navigator, 2, 2);
        navigator.settle().await;
        assert_eq!(navigator.controller().live_popup().unwrap().term(), "ATP");
        assert!(navigator.controller().live_popup().unwrap().show_back());

        navigator.handle(Trigger::BackRequested.into());
        navigator.settle().await;

        let requests = fetcher.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].history, vec!["mitochondria"]);
        let live = navigator.controller().live_popup().unwrap();
        assert_eq!(live.term(), "mitochondria");
        assert!(!live.show_back());
        assert!(navigator.host().calls.ends_with(&[
            "clear".to_string(),
            "remove popup-2".to_string(),
            "open popup-3 mitochondria back=false".to_string(),
            "define popup-3 mitochondria: 5 words".to_string(),
        ]));
    }

    #[tokio::test]
    async fn selections_during_lookup_are_dropped() {
        let (fetcher, mut navigator) = navigator(scripted().holding("mitochondria"));
        navigator.handle(select_on_page("mitochondria"));
        navigator.handle(select_on_page("powerhouse"));
        assert_eq!(navigator.controller().live_popup().unwrap().term(), "mitochondria");

        fetcher.release.notify_one();
        navigator.settle().await;

        assert_eq!(fetcher.requests().len(), 1);
        let opened = navigator
            .host()
            .calls
            .iter()
            .filter(|call| call.starts_with("open"))
            .count();
        assert_eq!(opened, 1);
    }

    #[tokio::test]
    async fn back_during_drill_ignores_late_definition() {
        let (fetcher, mut navigator) = navigator(scripted().holding("ATP"));
        navigator.handle(select_on_page("mitochondria"));
        navigator.settle().await;

        drag(&mut navigator, 2, 2);
        navigator.handle(Trigger::BackRequested.into());
        fetcher.release.notify_one();
        navigator.settle().await;

        let live = navigator.controller().live_popup().unwrap();
        assert_eq!(live.term(), "mitochondria");
        assert!(!navigator.controller().is_busy());
        assert!(navigator.controller().history().is_empty());
        assert!(
            !navigator
                .host()
                .calls
                .iter()
                .any(|call| call.starts_with("define popup-2"))
        );
    }

    #[tokio::test]
    async fn failed_lookup_renders_error() {
        let (_, mut navigator) = navigator(ScriptedFetcher::default());
        navigator.handle(select_on_page("powerhouse"));
        navigator.settle().await;
        assert_eq!(
            navigator.host().calls.last().map(String::as_str),
            Some("error popup-1 offline")
        );
        assert!(!navigator.controller().is_busy());
    }

    #[tokio::test]
    async fn panicking_lookup_releases_guard() {
        let (_, mut navigator) = navigator(scripted().failing_hard("mitochondria"));
        navigator.handle(select_on_page("mitochondria"));
        navigator.settle().await;

        assert_eq!(
            navigator.host().calls.last().cloned(),
            Some(format!("error popup-1 {LOOKUP_FAILED}"))
        );
        assert!(!navigator.controller().is_busy());

        navigator.handle(select_on_page("powerhouse"));
        navigator.settle().await;
        let live = navigator.controller().live_popup().unwrap();
        assert_eq!(live.term(), "powerhouse");
        assert_eq!(navigator.controller().state(), NavState::Presenting);
    }

    #[tokio::test]
    async fn run_loop_drains_events_and_fetches() {
        let (_, mut navigator) = navigator(scripted());
        let (tx, rx) = mpsc::channel(8);
        tx.send(select_on_page("mitochondria")).await.unwrap();
        tx.send(HostEvent::Viewport(Viewport {
            height: 900.0,
            scroll_x: 0.0,
            scroll_y: 40.0,
        }))
        .await
        .unwrap();
        drop(tx);

        navigator.run(rx).await;

        assert_eq!(navigator.controller().state(), NavState::Presenting);
        assert_eq!(navigator.controller().viewport().scroll_y, 40.0);
    }

    #[tokio::test]
    async fn close_ends_session_and_clears_selection() {
        let (_, mut navigator) = navigator(scripted());
        navigator.handle(select_on_page("mitochondria"));
        navigator.settle().await;
        drag(&mut navigator, 2, 2);
        navigator.settle().await;

        navigator.handle(
            Trigger::CloseRequested {
                reason: CloseReason::OutsideClick,
            }
            .into(),
        );

        assert_eq!(navigator.controller().state(), NavState::Idle);
        assert!(navigator.controller().history().is_empty());
        assert!(navigator.host().calls.ends_with(&[
            "clear".to_string(),
            "remove popup-2".to_string(),
        ]));
    }
}
