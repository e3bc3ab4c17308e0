//! Client library for the VyaparAI expense and invoice assistant.
//!
//! The chat view-model (`chat`) is the core: it turns user intents into
//! backend exchanges through the `transport::Backend` seam and records every
//! outcome in an append-only message log (`message`). `app` holds the
//! authentication flow and the record screens; `render` and `repl` make up
//! the terminal surface used by the `vyapar` binary.

pub mod app;
pub mod capture;
pub mod chat;
pub mod config;
pub mod expense;
pub mod message;
pub mod render;
pub mod repl;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_helpers;
