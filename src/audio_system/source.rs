/// Logical playback channels
///
/// Every managed request is assigned to one lane; each lane holds at most one active
/// request at a time.
use std::fmt;

use serde::Serialize;

/// Logical audio lanes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Greeting played when a level opens
    Welcome,

    /// Menu and navigation cues
    Menu,

    /// Words and effects during play
    Gameplay,

    /// Alerts that must always be heard
    System,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Welcome => write!(f, "welcome"),
            Channel::Menu => write!(f, "menu"),
            Channel::Gameplay => write!(f, "gameplay"),
            Channel::System => write!(f, "system"),
        }
    }
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Welcome,
        Channel::Menu,
        Channel::Gameplay,
        Channel::System,
    ];

    /// Get default priority (higher = more important)
    pub fn default_priority(&self) -> i32 {
        match self {
            Channel::System => 100,
            Channel::Welcome => 80,
            Channel::Gameplay => 60,
            Channel::Menu => 40,
        }
    }

    /// Parse a channel name, case-insensitive
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.to_string().eq_ignore_ascii_case(name.trim()))
    }
}
