//! HTTP server: router, handlers and bootstrap

mod router;
mod server;

pub use router::{AppState, create_router};
pub use server::{Server, spawn_reaper};
