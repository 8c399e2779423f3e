pub mod base;
pub mod logging;
pub mod network;
pub mod player;

pub use base::*;
pub use logging::*;
pub use network::*;
pub use player::*;
