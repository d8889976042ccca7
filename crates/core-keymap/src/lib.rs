//! Fixed readline-style dispatch table: key event → editor command.
//!
//! The table is deliberately static; user-configurable bindings belong to a
//! lower input layer and are out of scope here.

use core_events::{EditorCmd, KeyCode, KeyEvent, KeyModifiers};

/// Resolve one key event. `None` means the key is unbound and ignored.
pub fn resolve(key: &KeyEvent) -> Option<EditorCmd> {
    use EditorCmd::*;

    if key.mods.contains(KeyModifiers::CTRL) {
        return match key.code {
            KeyCode::Char('a') => Some(MoveHome),
            KeyCode::Char('e') => Some(MoveEnd),
            KeyCode::Char('b') => Some(MoveLeft),
            KeyCode::Char('f') => Some(MoveRight),
            KeyCode::Char('d') => Some(Eof),
            KeyCode::Char('k') => Some(KillToEnd),
            KeyCode::Char('u') => Some(KillToStart),
            KeyCode::Char('w') => Some(KillWordBackward),
            KeyCode::Char('y') => Some(Yank),
            KeyCode::Char('l') => Some(ClearScreen),
            KeyCode::Char('r') => Some(HistoryPrevMatch),
            KeyCode::Char('s') => Some(HistoryNextMatch),
            KeyCode::Char('h') => Some(DeleteBackward),
            KeyCode::Char('j') | KeyCode::Char('m') => Some(Execute),
            _ => None,
        };
    }

    if key.mods.contains(KeyModifiers::ALT) {
        return match key.code {
            KeyCode::Char('b') | KeyCode::Left => Some(MoveWordLeft),
            KeyCode::Char('f') | KeyCode::Right => Some(MoveWordRight),
            KeyCode::Char('d') => Some(KillWordForward),
            KeyCode::Char('y') => Some(YankRotate),
            KeyCode::Backspace => Some(KillWordBackward),
            KeyCode::Up => Some(HistoryTokenSearch),
            _ => None,
        };
    }

    match key.code {
        KeyCode::Char(c) => Some(SelfInsert(c)),
        KeyCode::Enter => Some(Execute),
        KeyCode::Tab => Some(Complete),
        KeyCode::BackTab => Some(Complete),
        KeyCode::Backspace => Some(DeleteBackward),
        KeyCode::Delete => Some(DeleteForward),
        KeyCode::Left => Some(MoveLeft),
        // Right arrow accepts the autosuggestion at end of line; the reader
        // falls back to a plain cursor move when there is none.
        KeyCode::Right => Some(AcceptAutosuggestion),
        KeyCode::Up => Some(HistoryPrevMatch),
        KeyCode::Down => Some(HistoryNextMatch),
        KeyCode::Home => Some(MoveHome),
        KeyCode::End => Some(MoveEnd),
        KeyCode::Esc => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_events::EditorCmd;

    #[test]
    fn printable_keys_self_insert() {
        let cmd = resolve(&KeyEvent::plain(KeyCode::Char('x')));
        assert_eq!(cmd, Some(EditorCmd::SelfInsert('x')));
    }

    #[test]
    fn control_bindings() {
        assert_eq!(resolve(&KeyEvent::ctrl('a')), Some(EditorCmd::MoveHome));
        assert_eq!(resolve(&KeyEvent::ctrl('k')), Some(EditorCmd::KillToEnd));
        assert_eq!(resolve(&KeyEvent::ctrl('r')), Some(EditorCmd::HistoryPrevMatch));
        assert_eq!(resolve(&KeyEvent::ctrl('d')), Some(EditorCmd::Eof));
    }

    #[test]
    fn alt_word_motion() {
        let key = KeyEvent {
            code: KeyCode::Char('f'),
            mods: KeyModifiers::ALT,
        };
        assert_eq!(resolve(&key), Some(EditorCmd::MoveWordRight));
    }

    #[test]
    fn arrows_and_editing_keys() {
        assert_eq!(resolve(&KeyEvent::plain(KeyCode::Enter)), Some(EditorCmd::Execute));
        assert_eq!(resolve(&KeyEvent::plain(KeyCode::Tab)), Some(EditorCmd::Complete));
        assert_eq!(
            resolve(&KeyEvent::plain(KeyCode::Up)),
            Some(EditorCmd::HistoryPrevMatch)
        );
        assert_eq!(
            resolve(&KeyEvent::plain(KeyCode::Right)),
            Some(EditorCmd::AcceptAutosuggestion)
        );
    }

    #[test]
    fn unbound_keys_ignored() {
        assert_eq!(resolve(&KeyEvent::plain(KeyCode::Esc)), None);
        assert_eq!(resolve(&KeyEvent::ctrl('q')), None);
    }
}
