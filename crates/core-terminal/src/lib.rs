//! Terminal mode management for the line editor.
//!
//! The reader paints in place on the normal screen, so only raw mode is
//! toggled, never the alternate screen. Every child invocation (the pager,
//! executed commands) runs under a scoped cooked-mode restore that re-enters
//! raw mode on every exit path.

use anyhow::Result;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

pub trait TerminalBackend {
    fn enter(&mut self) -> Result<()>;
    fn leave(&mut self) -> Result<()>;
}

pub struct CrosstermBackend {
    entered: bool,
}

/// RAII guard ensuring raw mode is left even if the caller early-returns or
/// panics.
pub struct TerminalGuard<'a> {
    backend: &'a mut CrosstermBackend,
}

impl Default for CrosstermBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CrosstermBackend {
    pub fn new() -> CrosstermBackend {
        CrosstermBackend { entered: false }
    }

    /// Enter raw mode and return a guard that leaves on drop.
    pub fn enter_guard(&mut self) -> Result<TerminalGuard<'_>> {
        self.enter()?;
        Ok(TerminalGuard { backend: self })
    }
}

impl TerminalBackend for CrosstermBackend {
    fn enter(&mut self) -> Result<()> {
        if !self.entered {
            enable_raw_mode()?;
            self.entered = true;
        }
        Ok(())
    }

    fn leave(&mut self) -> Result<()> {
        if self.entered {
            disable_raw_mode()?;
            self.entered = false;
        }
        Ok(())
    }
}

impl Drop for CrosstermBackend {
    fn drop(&mut self) {
        let _ = self.leave();
    }
}

impl<'a> Drop for TerminalGuard<'a> {
    fn drop(&mut self) {
        let _ = self.backend.leave();
    }
}

/// Run `f` with the terminal in cooked mode, restoring raw mode afterwards
/// regardless of how `f` exits. Used around the pager and every executed
/// command.
pub fn scoped_cooked<T>(f: impl FnOnce() -> T) -> Result<T> {
    disable_raw_mode()?;
    // Restore on unwind too.
    struct Restore;
    impl Drop for Restore {
        fn drop(&mut self) {
            let _ = enable_raw_mode();
        }
    }
    let _restore = Restore;
    Ok(f())
}
