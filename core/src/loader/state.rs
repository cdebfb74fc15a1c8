//! Load progress
//!
//! ```text
//! CheckingCache -> DiscoveringPeers -> Downloading -> Verifying -> Ready
//!        \________________\_________________\____________\-> Error
//! ```

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    CheckingCache,
    DiscoveringPeers,
    Downloading { completed: usize, total: usize },
    Verifying,
    Ready,
    Error(String),
}

impl LoadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadState::Ready | LoadState::Error(_))
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::CheckingCache => write!(f, "checking cache"),
            LoadState::DiscoveringPeers => write!(f, "discovering peers"),
            LoadState::Downloading { completed, total } => {
                write!(f, "downloading {}/{}", completed, total)
            }
            LoadState::Verifying => write!(f, "verifying"),
            LoadState::Ready => write!(f, "ready"),
            LoadState::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}
