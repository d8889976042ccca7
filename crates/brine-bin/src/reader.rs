//! Interactive reader: owns the frame stack, dispatches editor commands,
//! coordinates the async highlight/completion workers through buffer
//! generations, and drives the screen diff.

use crate::executor::{self, ExecOutcome};
use crate::pager;
use anyhow::Result;
use core_argspec::ArgSpecRegistry;
use core_complete::{
    Candidate, Insertion, Quoting, escape_for_insertion, insertion_for, quoting_context,
};
use core_config::{EditorConfig, EnvSnapshot, Theme};
use core_events::{
    CompletionOutcome, EditorCmd, Event, HighlightOutcome, InputEvent, KeyCode, KeyEvent,
};
use core_functions::{Autoload, FunctionRegistry, RegistryAutoloadHandler};
use core_highlight::{CancelToken, OptionValidator, autosuggest_validate, highlight};
use core_history::{HistoryItem, HistorySession, SearchMode};
use core_lex::{Completeness, command_completeness, compute_indents, token_extent};
use core_render::{Cell, FrameInput, Screen, compose, finish_line, style_for};
use core_terminal::scoped_cooked;
use core_text::{Direction, EditBuffer, Highlight, KillRing, Role};
use core_uvar::UvarClient;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};

/// Validator adapter handing the highlighter's switch checks to the
/// argument-spec registry.
struct SpecValidator(Arc<ArgSpecRegistry>);

impl OptionValidator for SpecValidator {
    fn is_valid_option(&self, command: &str, option: &str) -> Option<bool> {
        self.0.option_validity(command, option)
    }
}

/// One nested reader level; the `read` builtin pushes another.
pub struct ReaderFrame {
    pub buffer: EditBuffer,
    pub prompt: String,
    pub autosuggestion: Option<String>,
    /// Variable the `read` builtin stores the line into.
    pub read_target: Option<String>,
}

impl ReaderFrame {
    fn new(prompt: String, read_target: Option<String>) -> ReaderFrame {
        ReaderFrame {
            buffer: EditBuffer::new(),
            prompt,
            autosuggestion: None,
            read_target,
        }
    }
}

struct SearchState {
    needle: String,
    mode: SearchMode,
    original: String,
}

struct PendingCompletion {
    generation: u64,
    token: String,
    candidates: Vec<Candidate>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Reader {
    frames: Vec<ReaderFrame>,
    kill_ring: KillRing,
    history: HistorySession,
    screen: Screen,
    theme: Theme,
    config: EditorConfig,
    argspecs: Arc<ArgSpecRegistry>,
    functions: Arc<FunctionRegistry>,
    autoload: Arc<Autoload>,
    uvar: Option<UvarClient>,
    tx: Sender<Event>,
    highlight_cancel: CancelToken,
    complete_cancel: CancelToken,
    pending: Option<PendingCompletion>,
    search: Option<SearchState>,
    last_was_search: bool,
    error_line: Option<String>,
    width: usize,
    /// Disabled under tests where no tty exists.
    paint: bool,
}

impl Reader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prompt: String,
        history: HistorySession,
        config: EditorConfig,
        argspecs: Arc<ArgSpecRegistry>,
        functions: Arc<FunctionRegistry>,
        autoload: Arc<Autoload>,
        uvar: Option<UvarClient>,
        tx: Sender<Event>,
        width: usize,
    ) -> Reader {
        let theme = Theme::from_snapshot(&Self::snapshot_now(&functions));
        Reader {
            frames: vec![ReaderFrame::new(prompt, None)],
            kill_ring: KillRing::default(),
            history,
            screen: Screen::new(),
            theme,
            config,
            argspecs,
            functions,
            autoload,
            uvar,
            tx,
            highlight_cancel: CancelToken::new(),
            complete_cancel: CancelToken::new(),
            pending: None,
            search: None,
            last_was_search: false,
            error_line: None,
            width: width.max(20),
            paint: true,
        }
    }

    #[cfg(test)]
    fn disable_paint(&mut self) {
        self.paint = false;
    }

    fn snapshot_now(functions: &FunctionRegistry) -> EnvSnapshot {
        EnvSnapshot::capture(
            executor::builtin_set(),
            functions.names().into_iter().collect(),
        )
    }

    fn frame(&mut self) -> &mut ReaderFrame {
        self.frames.last_mut().expect("frame stack never empty")
    }

    fn frame_ref(&self) -> &ReaderFrame {
        self.frames.last().expect("frame stack never empty")
    }

    pub fn buffer_text(&self) -> String {
        self.frame_ref().buffer.text()
    }

    /// Entry point for every event from the shared channel.
    pub async fn handle(&mut self, event: Event) -> Result<Flow> {
        match event {
            Event::Input(InputEvent::Key(key)) => self.handle_key(key).await,
            Event::Input(InputEvent::Resize(w, _)) => {
                self.width = (w as usize).max(20);
                self.screen.invalidate();
                self.repaint()?;
                Ok(Flow::Continue)
            }
            Event::Input(InputEvent::Eof) => Ok(Flow::Exit),
            Event::Highlight(outcome) => {
                self.apply_highlight(outcome);
                self.repaint()?;
                Ok(Flow::Continue)
            }
            Event::Completion(outcome) => {
                self.apply_completion(outcome)?;
                Ok(Flow::Continue)
            }
            Event::Tick => {
                self.history.save_if_due();
                Ok(Flow::Continue)
            }
            Event::Interrupt => {
                // SIGINT at top level clears the line without executing.
                self.frame().buffer.set("", 0);
                self.frame().autosuggestion = None;
                self.clear_search();
                self.error_line = None;
                self.refresh();
                Ok(Flow::Continue)
            }
            Event::Shutdown => Ok(Flow::Exit),
        }
    }

    async fn handle_key(&mut self, key: KeyEvent) -> Result<Flow> {
        let Some(cmd) = core_keymap::resolve(&key) else {
            return Ok(Flow::Continue);
        };
        self.dispatch(cmd).await
    }

    async fn dispatch(&mut self, cmd: EditorCmd) -> Result<Flow> {
        use EditorCmd::*;
        let is_search_cmd = matches!(cmd, HistoryPrevMatch | HistoryNextMatch | HistoryTokenSearch);
        if !is_search_cmd && self.last_was_search {
            self.clear_search();
        }
        let is_completion_nav = matches!(cmd, Complete);
        if !is_completion_nav {
            // Any other keystroke cancels an in-flight completion.
            self.complete_cancel.cancel();
            if !is_search_cmd {
                self.pending = None;
            }
        }

        match cmd {
            SelfInsert(c) => {
                self.error_line = None;
                self.frame().buffer.insert(&c.to_string());
                self.refresh();
            }
            MoveLeft => {
                let cur = self.frame_ref().buffer.cursor();
                self.frame().buffer.set_cursor(cur.saturating_sub(1));
                self.refresh();
            }
            MoveRight => {
                let cur = self.frame_ref().buffer.cursor();
                self.frame().buffer.set_cursor(cur + 1);
                self.refresh();
            }
            MoveWordLeft => {
                self.frame().buffer.move_by_word(Direction::Left);
                self.refresh();
            }
            MoveWordRight => {
                self.frame().buffer.move_by_word(Direction::Right);
                self.refresh();
            }
            MoveHome => {
                self.frame().buffer.set_cursor(0);
                self.refresh();
            }
            MoveEnd => {
                let len = self.frame_ref().buffer.len();
                self.frame().buffer.set_cursor(len);
                self.refresh();
            }
            DeleteBackward => {
                self.frame().buffer.delete_backward();
                self.refresh();
            }
            DeleteForward => {
                self.frame().buffer.delete_forward();
                self.refresh();
            }
            KillToEnd => {
                let (cursor, len) = {
                    let b = &self.frame_ref().buffer;
                    (b.cursor(), b.len())
                };
                let ring = &mut self.kill_ring;
                let frame = self.frames.last_mut().unwrap();
                frame
                    .buffer
                    .kill(cursor..len, core_text::KillDirection::Forward, false, ring);
                self.refresh();
            }
            KillToStart => {
                let cursor = self.frame_ref().buffer.cursor();
                let ring = &mut self.kill_ring;
                let frame = self.frames.last_mut().unwrap();
                frame
                    .buffer
                    .kill(0..cursor, core_text::KillDirection::Backward, false, ring);
                self.refresh();
            }
            KillWordBackward => {
                let ring = &mut self.kill_ring;
                let frame = self.frames.last_mut().unwrap();
                frame.buffer.kill_word(Direction::Left, ring, true);
                self.refresh();
            }
            KillWordForward => {
                let ring = &mut self.kill_ring;
                let frame = self.frames.last_mut().unwrap();
                frame.buffer.kill_word(Direction::Right, ring, true);
                self.refresh();
            }
            Yank => {
                let ring = &self.kill_ring;
                let frame = self.frames.last_mut().unwrap();
                frame.buffer.yank(ring);
                self.refresh();
            }
            YankRotate => {
                let ring = &mut self.kill_ring;
                let frame = self.frames.last_mut().unwrap();
                frame.buffer.yank_rotate(ring);
                self.refresh();
            }
            AcceptAutosuggestion => {
                let frame = self.frames.last_mut().unwrap();
                let at_end = frame.buffer.cursor() == frame.buffer.len();
                match (at_end, frame.autosuggestion.take()) {
                    (true, Some(suffix)) => {
                        // The stored suggestion is the untyped remainder.
                        let text = format!("{}{}", frame.buffer.text(), suffix);
                        let len = text.chars().count();
                        frame.buffer.set(&text, len);
                    }
                    (_, keep) => {
                        frame.autosuggestion = keep;
                        let cur = frame.buffer.cursor();
                        frame.buffer.set_cursor(cur + 1);
                    }
                }
                self.refresh();
            }
            ClearScreen => {
                if self.paint {
                    use crossterm::{execute, terminal};
                    let mut out = std::io::stdout();
                    let _ = execute!(
                        out,
                        terminal::Clear(terminal::ClearType::All),
                        crossterm::cursor::MoveTo(0, 0)
                    );
                }
                self.screen.reset_origin();
                self.repaint()?;
            }
            Complete => self.start_completion(),
            Execute => return self.execute_line().await,
            HistoryPrevMatch => {
                self.search_step(SearchMode::Contains, false);
                self.refresh();
            }
            HistoryNextMatch => {
                self.search_step(SearchMode::Contains, true);
                self.refresh();
            }
            HistoryTokenSearch => {
                self.token_search_step();
                self.refresh();
            }
            Eof => {
                if self.frame_ref().buffer.is_empty() {
                    if self.frames.len() > 1 {
                        self.frames.pop();
                        self.screen.reset_origin();
                        self.repaint()?;
                        return Ok(Flow::Continue);
                    }
                    return Ok(Flow::Exit);
                }
            }
        }
        Ok(Flow::Continue)
    }

    // ----- history search -------------------------------------------------

    fn clear_search(&mut self) {
        self.search = None;
        self.last_was_search = false;
        self.history.reset_search();
    }

    fn search_step(&mut self, mode: SearchMode, forward: bool) {
        if self.search.is_none() {
            let original = self.frame_ref().buffer.text();
            self.history.reset_search();
            self.search = Some(SearchState {
                needle: original.clone(),
                mode,
                original,
            });
        }
        let (needle, mode) = {
            let s = self.search.as_ref().unwrap();
            (s.needle.clone(), s.mode)
        };
        let found = if forward {
            self.history.next_match(&needle, mode)
        } else {
            self.history.prev_match(&needle, mode)
        };
        match found {
            Some(text) => {
                let len = text.chars().count();
                self.frame().buffer.set(&text, len);
            }
            None if forward => {
                // Unwound past the first match: back to the edited line.
                let original = self.search.as_ref().unwrap().original.clone();
                let len = original.chars().count();
                self.frame().buffer.set(&original, len);
            }
            None => {}
        }
        self.last_was_search = true;
    }

    fn token_search_step(&mut self) {
        if self.search.is_none() {
            let chars: Vec<char> = self.frame_ref().buffer.chars().to_vec();
            let ext = token_extent(&chars, self.frame_ref().buffer.cursor());
            let needle: String = chars[ext].iter().collect();
            self.history.reset_search();
            self.search = Some(SearchState {
                needle,
                mode: SearchMode::Token,
                original: self.frame_ref().buffer.text(),
            });
        }
        let needle = self.search.as_ref().unwrap().needle.clone();
        if let Some(token) = self.history.prev_match(&needle, SearchMode::Token) {
            self.replace_current_token(&token, false, true);
        }
        self.last_was_search = true;
    }

    // ----- completion -----------------------------------------------------

    fn start_completion(&mut self) {
        let generation = self.frame_ref().buffer.generation();
        // A second tab on the same buffer reuses the computed list and goes
        // straight to the pager.
        if let Some(pending) = self.pending.take() {
            if pending.generation == generation {
                if let Err(e) = self.show_pager(&pending.candidates, &pending.token) {
                    warn!(target: "complete", %e, "pager_failed");
                }
                return;
            }
        }

        self.complete_cancel.cancel();
        self.complete_cancel = CancelToken::new();
        let cancel = self.complete_cancel.clone();
        let chars: Vec<char> = self.frame_ref().buffer.chars().to_vec();
        let cursor = self.frame_ref().buffer.cursor();
        let snap = Self::snapshot_now(&self.functions);
        let argspecs = self.argspecs.clone();
        let tx = self.tx.clone();
        let ext = token_extent(&chars, cursor);
        let token: String = chars[ext.start..cursor.max(ext.start).min(ext.end)]
            .iter()
            .collect();

        tokio::task::spawn_blocking(move || {
            let candidates = core_complete::complete(&chars, cursor, &snap, Some(&argspecs), &cancel);
            if cancel.is_cancelled() {
                return;
            }
            let _ = tx.blocking_send(Event::Completion(CompletionOutcome {
                generation,
                token,
                candidates,
            }));
        });
    }

    fn apply_completion(&mut self, outcome: CompletionOutcome) -> Result<()> {
        if outcome.generation != self.frame_ref().buffer.generation() {
            debug!(target: "complete", "stale_completion_discarded");
            return Ok(());
        }
        match insertion_for(&outcome.candidates, &outcome.token) {
            None => {
                // Nothing to offer.
            }
            Some(Insertion::Single { text, append_space }) => {
                self.replace_current_token(&text, append_space, true);
                self.refresh();
            }
            Some(Insertion::CommonPrefix(prefix)) => {
                self.replace_current_token(&prefix, false, true);
                // Remember the list: an immediate second tab pagers it.
                self.pending = Some(PendingCompletion {
                    generation: self.frame_ref().buffer.generation(),
                    token: prefix,
                    candidates: outcome.candidates,
                });
                self.refresh();
            }
            Some(Insertion::ShowPager) => {
                self.show_pager(&outcome.candidates, &outcome.token)?;
            }
        }
        Ok(())
    }

    fn show_pager(&mut self, candidates: &[Candidate], token: &str) -> Result<()> {
        let command = self
            .config
            .pager_command
            .clone()
            .unwrap_or_else(|| pager::DEFAULT_PAGER.to_string());
        let choice = if self.paint {
            scoped_cooked(|| pager::run_pager(&command, candidates))??
        } else {
            pager::run_pager(&command, candidates)?
        };
        // The pager owned the tty; our screen contents are gone.
        self.screen.reset_origin();
        match choice {
            Some(chosen) => {
                let escaped_token = escape_for_insertion(token, Quoting::None);
                if let Some(suffix) = chosen.strip_prefix(escaped_token.as_str()) {
                    // Splice the remainder back through the input queue as
                    // if typed.
                    for c in suffix.chars() {
                        let _ = self.tx.try_send(Event::Input(InputEvent::Key(
                            KeyEvent::plain(KeyCode::Char(c)),
                        )));
                    }
                } else {
                    self.insert_raw_replacement(&chosen, false);
                }
            }
            None => {
                // Discard, beep, leave the buffer untouched.
                if self.paint {
                    use std::io::Write;
                    let mut out = std::io::stdout();
                    let _ = out.write_all(b"\x07");
                    let _ = out.flush();
                }
            }
        }
        self.repaint()?;
        Ok(())
    }

    /// Replace the token under the cursor with `replacement` (raw text,
    /// escaped for the token's quoting context).
    fn replace_current_token(&mut self, replacement: &str, append_space: bool, escape: bool) {
        let chars: Vec<char> = self.frame_ref().buffer.chars().to_vec();
        let cursor = self.frame_ref().buffer.cursor();
        let ext = token_extent(&chars, cursor);
        let prefix: String = chars[ext.start..cursor.max(ext.start).min(ext.end)]
            .iter()
            .collect();
        let quoting = quoting_context(&prefix);
        let inserted = if escape {
            escape_for_insertion(replacement, quoting)
        } else {
            replacement.to_string()
        };

        let mut text: Vec<char> = Vec::with_capacity(chars.len() + inserted.len());
        text.extend_from_slice(&chars[..ext.start]);
        text.extend(inserted.chars());
        let new_cursor = text.len();
        text.extend_from_slice(&chars[ext.end..]);
        let text: String = text.into_iter().collect();
        self.frame().buffer.set(&text, new_cursor);
        if append_space {
            self.frame().buffer.insert(" ");
        }
    }

    fn insert_raw_replacement(&mut self, text: &str, append_space: bool) {
        self.replace_current_token(text, append_space, false);
    }

    // ----- execute --------------------------------------------------------

    async fn execute_line(&mut self) -> Result<Flow> {
        let chars: Vec<char> = self.frame_ref().buffer.chars().to_vec();
        match command_completeness(&chars) {
            Completeness::Incomplete => {
                self.frame().buffer.insert("\n");
                self.refresh();
                return Ok(Flow::Continue);
            }
            Completeness::SyntaxError(msg) => {
                self.error_line = Some(msg);
                self.repaint()?;
                return Ok(Flow::Continue);
            }
            Completeness::Complete => {}
        }

        let line = self.frame_ref().buffer.text();
        self.error_line = None;

        // A nested frame is the `read` builtin: store and pop.
        if let Some(variable) = self.frame_ref().read_target.clone() {
            self.finish_painted_line()?;
            unsafe { std::env::set_var(&variable, &line) };
            self.frames.pop();
            self.screen.reset_origin();
            self.repaint()?;
            return Ok(Flow::Continue);
        }

        self.finish_painted_line()?;
        if !line.trim().is_empty() {
            let mut item = HistoryItem::now(line.clone());
            item.required_paths = executor::existing_paths(&line);
            self.history.add(item);
        }
        self.clear_search();

        let handler = RegistryAutoloadHandler::new(self.functions.clone());
        let function_path: Vec<std::path::PathBuf> = std::env::var("fish_function_path")
            .map(|v| v.split(':').filter(|d| !d.is_empty()).map(Into::into).collect())
            .unwrap_or_default();
        let ctx = executor::ExecContext {
            functions: &self.functions,
            autoload: &self.autoload,
            handler: &handler,
            function_path,
        };
        let outcome = if self.paint {
            scoped_cooked(|| executor::execute(&line, &ctx))??
        } else {
            executor::execute(&line, &ctx)?
        };
        self.screen.reset_origin();
        match outcome {
            ExecOutcome::Exit => return Ok(Flow::Exit),
            ExecOutcome::Continue => {}
            ExecOutcome::ReadRequest { variable, prompt } => {
                self.frames.push(ReaderFrame::new(prompt, Some(variable)));
            }
            ExecOutcome::SetUniversal { key, value, export } => {
                if let Some(client) = self.uvar.as_mut() {
                    client.set(&key, &value, export).await?;
                    client.barrier().await?;
                } else {
                    warn!(target: "uvar", "no_broker_connection");
                }
            }
            ExecOutcome::EraseUniversal { key } => {
                if let Some(client) = self.uvar.as_mut() {
                    client.erase(&key).await?;
                    client.barrier().await?;
                }
            }
        }

        self.frame().buffer.set("", 0);
        self.frame().autosuggestion = None;
        self.refresh();
        Ok(Flow::Continue)
    }

    fn finish_painted_line(&mut self) -> Result<()> {
        if self.paint {
            let mut out = std::io::stdout().lock();
            finish_line(&mut self.screen, &mut out)?;
        } else {
            self.screen.reset_origin();
        }
        Ok(())
    }

    // ----- highlight & paint ---------------------------------------------

    /// Kick the async highlight pass and repaint with the colours we have.
    fn refresh(&mut self) {
        self.spawn_highlight();
        if let Err(e) = self.repaint() {
            warn!(target: "reader", %e, "repaint_failed");
        }
    }

    fn spawn_highlight(&mut self) {
        self.highlight_cancel.cancel();
        self.highlight_cancel = CancelToken::new();
        let cancel = self.highlight_cancel.clone();
        let chars: Vec<char> = self.frame_ref().buffer.chars().to_vec();
        let cursor = self.frame_ref().buffer.cursor();
        let generation = self.frame_ref().buffer.generation();
        let snap = Self::snapshot_now(&self.functions);
        self.theme = Theme::from_snapshot(&snap);
        let argspecs = self.argspecs.clone();
        let tx = self.tx.clone();

        // Autosuggestion candidate from history; the worker validates it.
        let at_end = cursor == chars.len();
        let prefix = self.frame_ref().buffer.text();
        let candidate = if self.config.autosuggest && at_end && !prefix.is_empty() {
            self.history.suggestion(&prefix)
        } else {
            None
        };

        tokio::task::spawn_blocking(move || {
            let validator = SpecValidator(argspecs);
            let result = highlight(&chars, Some(cursor), &snap, Some(&validator), &cancel);
            if cancel.is_cancelled() {
                return;
            }
            let autosuggestion = candidate.filter(|text| {
                let (handled, ok) = autosuggest_validate(text, &snap, &cancel);
                !handled || ok
            });
            let indents = compute_indents(&chars);
            let _ = tx.blocking_send(Event::Highlight(HighlightOutcome {
                generation,
                colors: result.colors,
                indents,
                errors: result.errors,
                autosuggestion,
            }));
        });
    }

    fn apply_highlight(&mut self, outcome: HighlightOutcome) {
        if outcome.generation != self.frame_ref().buffer.generation() {
            debug!(target: "highlight", "stale_highlight_discarded");
            return;
        }
        let frame = self.frames.last_mut().unwrap();
        frame.buffer.set_colors(outcome.colors);
        frame.buffer.set_indents(outcome.indents);
        frame.autosuggestion = outcome
            .autosuggestion
            .and_then(|s| s.strip_prefix(&frame.buffer.text()).map(str::to_string))
            .filter(|s| !s.is_empty());
    }

    pub fn repaint(&mut self) -> Result<()> {
        let error_cells: Option<Vec<Cell>> = self.error_line.as_ref().map(|msg| {
            let style = style_for(Highlight::from_role(Role::Error), &self.theme);
            msg.chars().map(|ch| Cell { ch, style }).collect()
        });
        let frame_ref = self.frames.last().unwrap();
        let mut frame = compose(&FrameInput {
            prompt: &frame_ref.prompt,
            chars: frame_ref.buffer.chars(),
            colors: frame_ref.buffer.colors(),
            indents: frame_ref.buffer.indents(),
            cursor: frame_ref.buffer.cursor(),
            autosuggestion: frame_ref.autosuggestion.as_deref(),
            theme: &self.theme,
            width: self.width,
        });
        if let Some(cells) = error_cells {
            frame.lines.push(cells);
        }
        if self.paint {
            let mut out = std::io::stdout().lock();
            self.screen.repaint(&frame, &mut out)?;
        }
        Ok(())
    }

    /// Flush state on shutdown: history is saved by drop as well, but an
    /// explicit save surfaces errors while logging still works.
    pub fn shutdown(&mut self) {
        self.history.save();
    }
}
