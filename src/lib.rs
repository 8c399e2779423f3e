pub mod abr;
pub mod buffer;
pub mod clock;
pub mod codec;
pub mod common;
pub mod compositor;
pub mod configs;
pub mod fetch;
pub mod manifest;
pub mod player;
pub mod scheduler;
pub mod selector;
pub mod session;

pub use common::errors::{DecodeError, FetchError, ManifestError, PlayerError};
pub use player::{Collaborators, Player, PlayerCallbacks};
