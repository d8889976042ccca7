//! Async stdin service: a task reading `crossterm::EventStream` and feeding
//! normalized events into the shared channel.

use core_events::{Event, InputEvent, KeyCode, KeyEvent, KeyModifiers};
use crossterm::event::{
    Event as CEvent, EventStream, KeyCode as CKeyCode, KeyEvent as CKeyEvent,
    KeyEventKind as CKind, KeyModifiers as CMods,
};
use std::sync::Arc;
use tokio::sync::{Notify, mpsc::Sender};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Handle used to stop the input task promptly at shutdown.
#[derive(Clone, Debug)]
pub struct InputShutdown {
    notify: Arc<Notify>,
}

impl InputShutdown {
    pub fn signal(&self) {
        self.notify.notify_one();
    }
}

pub(crate) fn map_mods(m: CMods) -> KeyModifiers {
    let mut out = KeyModifiers::empty();
    if m.contains(CMods::CONTROL) {
        out |= KeyModifiers::CTRL;
    }
    if m.contains(CMods::ALT) {
        out |= KeyModifiers::ALT;
    }
    if m.contains(CMods::SHIFT) {
        out |= KeyModifiers::SHIFT;
    }
    out
}

pub(crate) fn map_key(key: &CKeyEvent) -> Option<KeyEvent> {
    if key.kind == CKind::Release {
        return None;
    }
    let code = match key.code {
        CKeyCode::Char(c) => KeyCode::Char(c),
        CKeyCode::Enter => KeyCode::Enter,
        CKeyCode::Esc => KeyCode::Esc,
        CKeyCode::Backspace => KeyCode::Backspace,
        CKeyCode::Tab => KeyCode::Tab,
        CKeyCode::BackTab => KeyCode::BackTab,
        CKeyCode::Up => KeyCode::Up,
        CKeyCode::Down => KeyCode::Down,
        CKeyCode::Left => KeyCode::Left,
        CKeyCode::Right => KeyCode::Right,
        CKeyCode::Home => KeyCode::Home,
        CKeyCode::End => KeyCode::End,
        CKeyCode::Delete => KeyCode::Delete,
        _ => return None,
    };
    Some(KeyEvent {
        code,
        mods: map_mods(key.modifiers),
    })
}

/// Spawn the input task. Returns its join handle and a shutdown signal.
pub fn spawn_input_task(sender: Sender<Event>) -> (JoinHandle<()>, InputShutdown) {
    let notify = Arc::new(Notify::new());
    let shutdown = InputShutdown {
        notify: notify.clone(),
    };
    let handle = tokio::spawn(async move {
        let mut stream = EventStream::new();
        loop {
            tokio::select! {
                _ = notify.notified() => {
                    debug!(target: "input", "input_task_shutdown_signal");
                    break;
                }
                maybe = stream.next() => {
                    let event = match maybe {
                        Some(Ok(ev)) => ev,
                        Some(Err(e)) => {
                            warn!(target: "input", %e, "input_stream_error");
                            break;
                        }
                        None => {
                            let _ = sender.send(Event::Input(InputEvent::Eof)).await;
                            break;
                        }
                    };
                    let mapped = match event {
                        CEvent::Key(key) => map_key(&key).map(InputEvent::Key),
                        CEvent::Resize(w, h) => Some(InputEvent::Resize(w, h)),
                        _ => None,
                    };
                    if let Some(input) = mapped {
                        if sender.send(Event::Input(input)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });
    (handle, shutdown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modifier_mapping() {
        let mods = map_mods(CMods::CONTROL | CMods::SHIFT);
        assert!(mods.contains(KeyModifiers::CTRL));
        assert!(mods.contains(KeyModifiers::SHIFT));
        assert!(!mods.contains(KeyModifiers::ALT));
    }

    #[test]
    fn key_mapping_basics() {
        let key = CKeyEvent::new(CKeyCode::Char('a'), CMods::NONE);
        assert_eq!(
            map_key(&key),
            Some(KeyEvent::plain(KeyCode::Char('a')))
        );
        let enter = CKeyEvent::new(CKeyCode::Enter, CMods::NONE);
        assert_eq!(map_key(&enter), Some(KeyEvent::plain(KeyCode::Enter)));
    }

    #[test]
    fn release_events_dropped() {
        let mut key = CKeyEvent::new(CKeyCode::Char('a'), CMods::NONE);
        key.kind = CKind::Release;
        assert_eq!(map_key(&key), None);
    }

    #[test]
    fn unsupported_keys_dropped() {
        let key = CKeyEvent::new(CKeyCode::F(5), CMods::NONE);
        assert_eq!(map_key(&key), None);
    }
}
