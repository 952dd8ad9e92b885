//! Game feed: websocket frames from the game mod into the shared control
//! state.

pub mod frame;
pub mod ingress;
pub mod listener;

pub use frame::GameFrame;
pub use ingress::Ingress;
pub use listener::{FeedError, FeedListener};
