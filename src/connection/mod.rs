//! Collaborators a live view talks to: the list transport and the change
//! notification channel, plus an in-memory loopback implementing both.

pub mod channel;
pub mod memory;
pub mod transport;

pub use channel::{Channel, ChannelSignal, SignalHandler, Subscription};
pub use memory::{DEFAULT_CHANNEL_CAPACITY, MemoryBackend};
pub use transport::Transport;
