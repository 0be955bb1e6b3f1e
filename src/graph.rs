mod matcher;
mod registry;
mod types;

pub use matcher::{ChannelClass, ChannelMatcher, SideMatcher};
pub use registry::{GraphRegistry, PortPlacement};
pub use types::*;
