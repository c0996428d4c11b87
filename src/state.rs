use std::fmt;

use serde::{Deserialize, Serialize};

// Breaker states. Discriminants are the values stored in the breaker's AtomicU8.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CircuitState {
    #[default]
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl CircuitState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    // Anything that is not a known state decodes as Open.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => CircuitState::Closed,
            1 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half-open",
            CircuitState::Open => "open",
        };
        f.write_str(name)
    }
}
