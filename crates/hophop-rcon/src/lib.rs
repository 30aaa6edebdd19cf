mod backoff;
mod client;
mod pending;
mod wire;

pub use backoff::{Backoff, HANDSHAKE_TIMEOUT, INITIAL_BACKOFF, MAX_BACKOFF};
pub use client::{DEFAULT_EXECUTE_TIMEOUT, RconClient, RconError, RconSettings, is_fatal_error};
pub use pending::ResponseHandler;
pub use wire::{InboundFrame, OutboundFrame, join_console_messages};
