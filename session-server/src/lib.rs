//! A generic coordination server for turn-based multiplayer sessions.
//!
//! Clients connect over TCP, send one framed JSON request and receive one
//! JSON response. The framework behind the socket starts and joins named
//! sessions, enforces turn order, resolves observers, and serves state
//! reads with a long-poll discipline so clients never have to poll. The
//! games themselves live behind the `game-backbone` contract.

pub mod config;
pub mod framework;
pub mod games;
pub mod server;
pub mod session;
pub mod wire;

pub use server::run;
