//! Sixteen-bit colour codes carried per code point in the edit buffer.
//!
//! The low byte holds the syntactic role; the top bits are overlay flags
//! OR'd on after role assignment. A dedicated sentinel value means "not yet
//! coloured" and is what the highlighter's fill-forward pass eliminates.

use bitflags::bitflags;

/// Syntactic role of a code point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Role {
    Normal = 0,
    Error = 1,
    Command = 2,
    End = 3,
    Param = 4,
    Comment = 5,
    Match = 6,
    SearchMatch = 7,
    Operator = 8,
    Escape = 9,
    Quote = 10,
    Redirection = 11,
    Autosuggestion = 12,
}

impl Role {
    fn from_raw(raw: u16) -> Option<Role> {
        Some(match raw {
            0 => Role::Normal,
            1 => Role::Error,
            2 => Role::Command,
            3 => Role::End,
            4 => Role::Param,
            5 => Role::Comment,
            6 => Role::Match,
            7 => Role::SearchMatch,
            8 => Role::Operator,
            9 => Role::Escape,
            10 => Role::Quote,
            11 => Role::Redirection,
            12 => Role::Autosuggestion,
            _ => return None,
        })
    }
}

bitflags! {
    /// Overlay bits OR'd on top of a role.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Overlay: u16 {
        const VALID_PATH = 1 << 14;
        const SEARCH_MATCH = 1 << 15;
    }
}

const ROLE_MASK: u16 = 0x00ff;
const UNCOLORED_ROLE: u16 = 0x00ff;

/// One colour code: role in the low byte, overlays in the high bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Highlight(u16);

impl Highlight {
    /// The sentinel every slot starts out as.
    pub const fn uncolored() -> Highlight {
        Highlight(UNCOLORED_ROLE)
    }

    pub const fn from_role(role: Role) -> Highlight {
        Highlight(role as u16)
    }

    pub fn is_uncolored(self) -> bool {
        self.0 & ROLE_MASK == UNCOLORED_ROLE
    }

    /// The role, or `None` while still at the sentinel.
    pub fn role(self) -> Option<Role> {
        Role::from_raw(self.0 & ROLE_MASK)
    }

    /// Replace the role, keeping overlay bits.
    pub fn with_role(self, role: Role) -> Highlight {
        Highlight((self.0 & !ROLE_MASK) | role as u16)
    }

    pub fn overlays(self) -> Overlay {
        Overlay::from_bits_truncate(self.0)
    }

    pub fn with_overlay(self, overlay: Overlay) -> Highlight {
        Highlight(self.0 | overlay.bits())
    }

    pub fn has_overlay(self, overlay: Overlay) -> bool {
        self.overlays().contains(overlay)
    }

    pub fn raw(self) -> u16 {
        self.0
    }
}

impl Default for Highlight {
    fn default() -> Self {
        Highlight::uncolored()
    }
}

impl From<Role> for Highlight {
    fn from(role: Role) -> Highlight {
        Highlight::from_role(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_has_no_role() {
        let h = Highlight::uncolored();
        assert!(h.is_uncolored());
        assert_eq!(h.role(), None);
    }

    #[test]
    fn overlay_survives_role_change() {
        let h = Highlight::from_role(Role::Param).with_overlay(Overlay::VALID_PATH);
        let h = h.with_role(Role::Match);
        assert_eq!(h.role(), Some(Role::Match));
        assert!(h.has_overlay(Overlay::VALID_PATH));
    }

    #[test]
    fn role_round_trip() {
        for role in [Role::Normal, Role::Command, Role::Autosuggestion] {
            assert_eq!(Highlight::from_role(role).role(), Some(role));
        }
    }
}
