use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use atty::Stream;
use clap::{Parser, Subcommand, ValueEnum};
use leveler_rs::fetch::DEFAULT_ENDPOINT;
use leveler_rs::{
    ClientConfig, CloseReason, ContextMode, DEFAULT_CONTEXT_SIZE, DefinitionFetcher,
    DefinitionRequest, DefinitionResponse, DocumentCache, HighlightCap, HostEvent, HttpFetcher,
    NavigationController, Navigator, PageSelection, PlainTextSource, PointerEvent, PopupHost,
    PopupId, PopupPosition, Rect, TextNodeRange, Token, Trigger, capture_selection,
    clean_selected_text, context_menu_selection, tokenize,
};
use leveler_rs::tokenize::render_tokens;
use serde_json::json;
use termimad::{FmtText, MadSkin, terminal_size};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "web")]
use leveler_rs::gemini::DEFAULT_MODEL;
#[cfg(feature = "web")]
use leveler_rs::limiter::DEFAULT_RATE_LIMIT;
#[cfg(feature = "web")]
use leveler_rs::web::{self, WebConfig};
#[cfg(feature = "web")]
use std::net::SocketAddr;

const MIN_SELECTION_CHARS: usize = 2;

#[derive(Parser, Debug)]
#[command(
    name = "leveler-rs",
    about = "Explain a term in ten words, then drill into the explanation",
    version
)]
pub struct Cli {
    /// Emit JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    /// Definition service endpoint.
    #[arg(long, global = true, env = "LEVELER_API_URL", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Request timeout in seconds.
    #[arg(long, global = true, default_value_t = 20)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split text into selectable words.
    Tokens {
        /// Text to tokenize.
        text: String,
    },
    /// Show the context a term would be sent with.
    Context {
        /// Text file to search.
        file: PathBuf,
        /// Term to locate.
        term: String,
        #[arg(long, value_enum, default_value_t = ModeArg::Sentence)]
        mode: ModeArg,
        /// Characters kept on each side of the term in window mode.
        #[arg(long, default_value_t = DEFAULT_CONTEXT_SIZE)]
        window: usize,
    },
    /// Fetch one definition.
    Define {
        /// Term to define.
        term: String,
        /// Surrounding text; defaults to the term itself.
        #[arg(long)]
        context: Option<String>,
    },
    /// Interactive exploration session driven from stdin.
    Explore {
        /// Page text; selections get their enclosing sentence as context.
        #[arg(long, conflicts_with = "pdf_text")]
        page: Option<PathBuf>,
        /// Text extracted from a PDF, pages separated by form feeds.
        #[arg(long)]
        pdf_text: Option<PathBuf>,
        /// Characters kept on each side of a term in PDF text.
        #[arg(long, default_value_t = DEFAULT_CONTEXT_SIZE)]
        window: usize,
    },
    /// Run the definition relay service.
    #[cfg(feature = "web")]
    Serve {
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: SocketAddr,
        /// Key for the hosted model.
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,
        /// Requests allowed per client per day.
        #[arg(long, default_value_t = DEFAULT_RATE_LIMIT)]
        rate_limit: u32,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Sentence,
    Window,
}

impl From<ModeArg> for ContextMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Sentence => ContextMode::Sentence,
            ModeArg::Window => ContextMode::Window,
        }
    }
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let client = ClientConfig {
        endpoint: cli.endpoint.clone(),
        timeout: Duration::from_secs(cli.timeout.max(1)),
    };
    match cli.command {
        Command::Tokens { text } => {
            init_tracing("warn");
            handle_tokens(&text, cli.json)
        }
        Command::Context {
            file,
            term,
            mode,
            window,
        } => {
            init_tracing("warn");
            handle_context(&file, &term, mode.into(), window, cli.json)
        }
        Command::Define { term, context } => {
            init_tracing("warn");
            runtime()?.block_on(handle_define(client, term, context, cli.json))
        }
        Command::Explore {
            page,
            pdf_text,
            window,
        } => {
            init_tracing("warn");
            runtime()?.block_on(handle_explore(client, page, pdf_text, window, cli.json))
        }
        #[cfg(feature = "web")]
        Command::Serve {
            addr,
            api_key,
            model,
            rate_limit,
        } => {
            init_tracing("info");
            let config = WebConfig {
                addr,
                api_key,
                model,
                rate_limit,
                ..WebConfig::default()
            };
            runtime()?.block_on(web::serve(config))?;
            Ok(())
        }
    }
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn runtime() -> Result<tokio::runtime::Runtime, Box<dyn Error>> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn handle_tokens(text: &str, as_json: bool) -> Result<(), Box<dyn Error>> {
    let tokens = tokenize(text);
    if as_json {
        println!("{}", serde_json::to_string_pretty(&tokens)?);
    } else {
        print_token_table(&tokens);
    }
    Ok(())
}

fn handle_context(
    file: &Path,
    term: &str,
    mode: ContextMode,
    window: usize,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let term = clean_selected_text(term);
    if term.is_empty() {
        return Err("Term cannot be empty".into());
    }
    let text = std::fs::read_to_string(file)?;
    let context = leveler_rs::extract(mode, &text, &term, window);

    if as_json {
        let payload = json!({
            "term": term,
            "mode": mode.to_string(),
            "context": context,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        render_markdown_block(&format!("Context for \"{term}\" ({mode})"), &context);
    }
    Ok(())
}

async fn handle_define(
    client: ClientConfig,
    term: String,
    context: Option<String>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let term = clean_selected_text(&term);
    if term.is_empty() {
        return Err("Term cannot be empty".into());
    }
    let fetcher = HttpFetcher::new(client)?;
    let context = context.unwrap_or_else(|| term.clone());
    let outcome = fetcher
        .fetch(DefinitionRequest::new(term.clone(), context, Vec::new()))
        .await;

    if as_json {
        let response = DefinitionResponse::from(outcome);
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        render_markdown_block(&term, &outcome?);
    }
    Ok(())
}

/// Where selection context comes from during an exploration session.
enum PageText {
    Blank,
    Page(String),
    Document(DocumentCache),
}

impl PageText {
    fn select(&self, raw: &str) -> Option<PageSelection> {
        match self {
            PageText::Blank => capture_selection(raw, None, raw),
            PageText::Page(text) => {
                let trimmed = raw.trim();
                let node = text.find(trimmed).map(|start| TextNodeRange {
                    text,
                    start,
                    end: start + trimmed.len(),
                });
                capture_selection(raw, node, text)
            }
            PageText::Document(cache) => {
                let selected = clean_selected_text(raw);
                if selected.chars().count() < MIN_SELECTION_CHARS {
                    return None;
                }
                Some(PageSelection {
                    context: cache.context_for(&selected),
                    selected_text: selected,
                })
            }
        }
    }
}

async fn handle_explore(
    client: ClientConfig,
    page: Option<PathBuf>,
    pdf_text: Option<PathBuf>,
    window: usize,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let page_text = match (page, pdf_text) {
        (Some(path), _) => PageText::Page(tokio::fs::read_to_string(&path).await?),
        (None, Some(path)) => {
            let cache = DocumentCache::new(1, window);
            let url = path.to_string_lossy().into_owned();
            let document = cache.load(&PlainTextSource::new(), &url).await?;
            eprintln!(
                "Loaded {} ({} pages, {} chars).",
                document.url,
                document.page_count,
                document.text.chars().count()
            );
            PageText::Document(cache)
        }
        (None, None) => PageText::Blank,
    };

    let fetcher = Arc::new(HttpFetcher::new(client)?);
    let host = TerminalHost { as_json };
    let mut navigator = Navigator::new(NavigationController::default(), fetcher, host);

    if !as_json {
        print_explore_help();
    }
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match command {
            "quit" | "exit" => break,
            "help" => print_explore_help(),
            "state" => print_state(&navigator, as_json)?,
            "select" => match page_text.select(rest) {
                Some(selection) => navigator.handle(
                    Trigger::FreshSelection {
                        selected_text: selection.selected_text,
                        context: selection.context,
                        rect: Rect::default(),
                    }
                    .into(),
                ),
                None => eprintln!("Selection ignored (must be 2 to 100 characters)."),
            },
            "menu" => match context_menu_selection(rest) {
                Some(selection) => navigator.handle(
                    Trigger::ContextMenuSelection {
                        selected_text: selection.selected_text,
                        context: selection.context,
                        rect: Rect::default(),
                    }
                    .into(),
                ),
                None => eprintln!("Nothing selected."),
            },
            "drill" => match parse_span(rest) {
                Some((from, to)) => drill(&mut navigator, from, to),
                None => eprintln!("Usage: drill <from> [to]"),
            },
            "back" => navigator.handle(Trigger::BackRequested.into()),
            "close" => navigator.handle(close(CloseReason::Button)),
            "esc" => navigator.handle(close(CloseReason::Escape)),
            "click-outside" => navigator.handle(close(CloseReason::OutsideClick)),
            other => eprintln!("Unknown command `{other}`; try `help`."),
        }
        navigator.settle().await;
    }
    navigator.settle().await;
    Ok(())
}

fn close(reason: CloseReason) -> HostEvent {
    Trigger::CloseRequested { reason }.into()
}

fn parse_span(args: &str) -> Option<(usize, usize)> {
    let mut parts = args.split_whitespace().map(str::parse::<usize>);
    let from = parts.next()?.ok()?;
    let to = match parts.next() {
        Some(to) => to.ok()?,
        None => from,
    };
    Some((from, to))
}

fn drill<F>(navigator: &mut Navigator<F, TerminalHost>, from: usize, to: usize)
where
    F: DefinitionFetcher + ?Sized + 'static,
{
    let Some(popup) = navigator.controller().live_popup().map(|popup| popup.id()) else {
        eprintln!("No popup is open.");
        return;
    };
    for event in [PointerEvent::Down(from), PointerEvent::Enter(to), PointerEvent::Up] {
        navigator.handle(HostEvent::Pointer { popup, event });
    }
}

fn print_state<F>(navigator: &Navigator<F, TerminalHost>, as_json: bool) -> Result<(), Box<dyn Error>>
where
    F: DefinitionFetcher + ?Sized + 'static,
{
    let controller = navigator.controller();
    let trail: Vec<&str> = controller
        .history()
        .iter()
        .map(|item| item.term.as_str())
        .collect();
    if as_json {
        let payload = json!({
            "state": controller.state(),
            "busy": controller.is_busy(),
            "history": trail,
            "popup": controller.live_popup().map(|popup| popup.snapshot()),
        });
        println!("{}", serde_json::to_string(&payload)?);
    } else {
        println!("state:   {:?}", controller.state());
        println!("busy:    {}", controller.is_busy());
        println!("trail:   {}", if trail.is_empty() { "-".to_string() } else { trail.join(" > ") });
        if let Some(popup) = controller.live_popup() {
            println!("popup:   {} \"{}\"", popup.id(), popup.term());
        }
    }
    Ok(())
}

fn print_explore_help() {
    println!("Commands:");
    println!("  select <text>     select text on the page");
    println!("  menu <text>       look up text from the context menu");
    println!("  drill <i> [j]     drag across words i..=j of the open definition");
    println!("  back              return to the previous definition");
    println!("  close | esc | click-outside");
    println!("  state             show the session");
    println!("  quit");
}

/// Renders popups as lines on stdout.
struct TerminalHost {
    as_json: bool,
}

impl TerminalHost {
    fn emit(&self, payload: serde_json::Value) {
        println!("{payload}");
    }
}

impl PopupHost for TerminalHost {
    fn open(&mut self, popup: PopupId, position: PopupPosition, term: &str, show_back: bool) {
        if self.as_json {
            self.emit(json!({ "event": "open", "popup": popup, "position": position, "term": term, "showBack": show_back }));
        } else {
            let back = if show_back { "  [back]" } else { "" };
            println!("\n[{popup}] {term}{back}");
        }
    }

    fn show_loading(&mut self, popup: PopupId, message: &str) {
        if self.as_json {
            self.emit(json!({ "event": "loading", "popup": popup, "message": message }));
        } else {
            println!("  {message}");
        }
    }

    fn show_definition(&mut self, popup: PopupId, term: &str, tokens: &[Token], show_back: bool) {
        if self.as_json {
            self.emit(json!({ "event": "definition", "popup": popup, "term": term, "tokens": tokens, "showBack": show_back }));
            return;
        }
        let definition = render_tokens(tokens);
        render_markdown_block(&format!("[{popup}] {term}"), &definition);
        let numbered: Vec<String> = tokens
            .iter()
            .enumerate()
            .map(|(index, token)| format!("{index}:{}", token.word))
            .collect();
        println!("  {}", numbered.join(" "));
    }

    fn show_error(&mut self, popup: PopupId, message: &str) {
        if self.as_json {
            self.emit(json!({ "event": "error", "popup": popup, "message": message }));
        } else {
            println!("  Error: {message}");
        }
    }

    fn highlight(&mut self, popup: PopupId, caps: &[(usize, HighlightCap)]) {
        if self.as_json {
            let caps: Vec<_> = caps
                .iter()
                .map(|(index, cap)| json!({ "index": index, "class": cap.class_name() }))
                .collect();
            self.emit(json!({ "event": "highlight", "popup": popup, "caps": caps }));
        }
    }

    fn remove(&mut self, popup: PopupId) {
        if self.as_json {
            self.emit(json!({ "event": "remove", "popup": popup }));
        }
    }

    fn clear_page_selection(&mut self) {
        if self.as_json {
            self.emit(json!({ "event": "clear_selection" }));
        }
    }
}

fn print_token_table(tokens: &[Token]) {
    if tokens.is_empty() {
        println!("No words found.");
        return;
    }
    let width = tokens
        .iter()
        .map(|token| token.word.chars().count())
        .max()
        .unwrap_or(4)
        .max("WORD".len());
    println!("{:>5}  {:<width$}  {}", "INDEX", "WORD", "DELIMITER", width = width);
    println!("{:->5}  {:-<width$}  {}", "", "", "---------", width = width);
    for (index, token) in tokens.iter().enumerate() {
        let delimiter = match token.delimiter.as_str() {
            " " => "space",
            "-" => "dash",
            _ => "-",
        };
        println!("{:>5}  {:<width$}  {}", index, token.word, delimiter, width = width);
    }
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn markdown_skin() -> MadSkin {
    MadSkin::default()
}

fn render_markdown_block(title: &str, body: &str) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return;
    }
    println!("\n{title}:");
    if stdout_is_tty() {
        let skin = markdown_skin();
        let formatted = FmtText::from(&skin, trimmed, Some(markdown_width()));
        println!("{formatted}");
    } else {
        println!("{trimmed}");
    }
}
