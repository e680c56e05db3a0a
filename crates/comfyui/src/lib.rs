//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed message parsing, WebSocket connections, HTTP API
//! wrappers, the [`backend::GenerationBackend`] seam the job manager
//! depends on, and completion detection over an event stream.

pub mod api;
pub mod backend;
pub mod client;
pub mod messages;
pub mod processor;
