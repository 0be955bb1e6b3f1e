//! Channel correlation between two ports.
//!
//! There is no authoritative channel map: the side is guessed from the last
//! character of the port name.

use super::types::Port;

/// Decides whether two ports carry the same channel and may be linked.
pub trait ChannelMatcher: Send + Sync {
    fn matches(&self, source: &Port, target: &Port) -> bool;
}

/// Channel class derived from a side marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelClass {
    Left,
    Right,
}

impl ChannelClass {
    pub fn from_side(side: char) -> Option<Self> {
        match side {
            'L' | '1' => Some(ChannelClass::Left),
            'R' | '2' => Some(ChannelClass::Right),
            _ => None,
        }
    }
}

/// `L`/`1` pair with each other, `R`/`2` pair with each other; anything
/// else never matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct SideMatcher;

impl ChannelMatcher for SideMatcher {
    fn matches(&self, source: &Port, target: &Port) -> bool {
        match (
            source.side.and_then(ChannelClass::from_side),
            target.side.and_then(ChannelClass::from_side),
        ) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}
