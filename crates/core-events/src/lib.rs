//! Event types and channel plumbing for the reader runtime.
//!
//! The reader consumes a single bounded channel fed by the input task, the
//! worker pool (highlight/completion results tagged with the buffer
//! generation they were computed for), timers, and signal handlers.

use core_complete::Candidate;
use core_highlight::HighlightError;
use core_text::Highlight;
use std::fmt;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

/// Bounded event channel capacity. One producer is the input task; worker
/// results and ticks are low-rate, so backpressure lands on input, which is
/// the desired behaviour under flood.
pub const EVENT_CHANNEL_CAP: usize = 8192;

/// Top-level event consumed by the reader loop.
#[derive(Debug)]
pub enum Event {
    Input(InputEvent),
    /// Worker finished a highlight pass for buffer `generation`.
    Highlight(HighlightOutcome),
    /// Worker finished computing completions for buffer `generation`.
    Completion(CompletionOutcome),
    /// Periodic tick driving history flushes and other slow timers.
    Tick,
    /// SIGINT at reader top level: clear the line without executing.
    Interrupt,
    Shutdown,
}

#[derive(Debug)]
pub struct HighlightOutcome {
    pub generation: u64,
    pub colors: Vec<Highlight>,
    pub indents: Vec<u32>,
    pub errors: Vec<HighlightError>,
    pub autosuggestion: Option<String>,
}

#[derive(Debug)]
pub struct CompletionOutcome {
    pub generation: u64,
    pub token: String,
    pub candidates: Vec<Candidate>,
}

/// Normalized input events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Key(KeyEvent),
    /// Terminal resize (columns, rows).
    Resize(u16, u16),
    /// End of input on stdin.
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyEvent {
    pub code: KeyCode,
    pub mods: KeyModifiers,
}

impl KeyEvent {
    pub fn plain(code: KeyCode) -> KeyEvent {
        KeyEvent {
            code,
            mods: KeyModifiers::empty(),
        }
    }

    pub fn ctrl(c: char) -> KeyEvent {
        KeyEvent {
            code: KeyCode::Char(c),
            mods: KeyModifiers::CTRL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    Char(char),
    Enter,
    Esc,
    Backspace,
    Tab,
    BackTab,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    Delete,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct KeyModifiers: u8 {
        const CTRL = 1 << 0;
        const ALT = 1 << 1;
        const SHIFT = 1 << 2;
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}{:?}", self.code, self.mods)
    }
}

/// Abstract editor commands the dispatch table resolves keys into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorCmd {
    MoveLeft,
    MoveRight,
    MoveWordLeft,
    MoveWordRight,
    MoveHome,
    MoveEnd,
    DeleteBackward,
    DeleteForward,
    KillToEnd,
    KillToStart,
    KillWordBackward,
    KillWordForward,
    Yank,
    YankRotate,
    Complete,
    Execute,
    HistoryPrevMatch,
    HistoryNextMatch,
    HistoryTokenSearch,
    AcceptAutosuggestion,
    ClearScreen,
    Eof,
    /// Insert the literal character.
    SelfInsert(char),
}

/// Async producers pushing events into the shared channel.
pub trait AsyncEventSource: Send + 'static {
    fn name(&self) -> &'static str;
    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()>;
}

/// Monotonic tick source driving periodic work (history flush interval).
pub struct TickEventSource {
    interval: std::time::Duration,
}

impl TickEventSource {
    pub fn new(interval: std::time::Duration) -> TickEventSource {
        TickEventSource { interval }
    }
}

impl AsyncEventSource for TickEventSource {
    fn name(&self) -> &'static str {
        "tick"
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        let dur = self.interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(dur);
            loop {
                interval.tick().await;
                if tx.send(Event::Tick).await.is_err() {
                    break;
                }
            }
        })
    }
}

/// Registry spawning every source with a clone of the channel sender.
#[derive(Default)]
pub struct EventSourceRegistry {
    sources: Vec<Box<dyn AsyncEventSource>>,
}

impl EventSourceRegistry {
    pub fn new() -> EventSourceRegistry {
        EventSourceRegistry::default()
    }

    pub fn register<S: AsyncEventSource>(&mut self, src: S) {
        self.sources.push(Box::new(src));
    }

    pub fn spawn_all(&mut self, tx: &Sender<Event>) -> Vec<JoinHandle<()>> {
        let mut out = Vec::with_capacity(self.sources.len());
        for src in self.sources.drain(..) {
            let name = src.name();
            tracing::info!(target: "runtime.events", source = name, "spawning event source");
            out.push(src.spawn(tx.clone()));
        }
        out
    }
}
