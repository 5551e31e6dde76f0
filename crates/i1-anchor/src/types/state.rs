//! RFC 5011 key rollover states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rollover state of one key (RFC 5011 section 4).
///
/// The numeric codes are what trust anchor files store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum KeyState {
    /// Not yet seen; untrusted
    Start = 0,
    /// Seen, waiting out the add hold-down
    AddPend = 1,
    /// Trusted
    Valid = 2,
    /// Trusted but absent from the last key set
    Missing = 3,
    /// Revoked by the zone
    Revoked = 4,
    /// Terminal; will be dropped
    Removed = 5,
}

impl KeyState {
    /// All states in code order.
    pub const ALL: [Self; 6] = [
        Self::Start,
        Self::AddPend,
        Self::Valid,
        Self::Missing,
        Self::Revoked,
        Self::Removed,
    ];

    /// Numeric code as persisted.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// State for a persisted code, `None` when the code is undefined.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Start),
            1 => Some(Self::AddPend),
            2 => Some(Self::Valid),
            3 => Some(Self::Missing),
            4 => Some(Self::Revoked),
            5 => Some(Self::Removed),
            _ => None,
        }
    }

    /// Upper-case label used in file comments and logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::AddPend => "ADDPEND",
            Self::Valid => "VALID",
            Self::Missing => "MISSING",
            Self::Revoked => "REVOKED",
            Self::Removed => "REMOVED",
        }
    }

    /// Keys in these states contribute to the trusted key sets.
    #[must_use]
    pub const fn is_trusted(self) -> bool {
        matches!(self, Self::Valid | Self::Missing)
    }

    /// Keys in these states carry nothing worth keeping.
    #[must_use]
    pub const fn is_inert(self) -> bool {
        matches!(self, Self::Start | Self::Removed)
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
