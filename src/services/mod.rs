//! Domain services used by the websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own room, presence, and market logic so route handlers
//! stay focused on protocol translation. Services mutate `AppState` and
//! fan events out to rooms themselves; replies to the originating
//! connection are returned to the caller.

pub mod broadcast;
pub mod market;
pub mod presence;
pub mod reconcile;
pub mod registry;
