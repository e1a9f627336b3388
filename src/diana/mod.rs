//! The Diana forward-private encrypted multi-map: update tokens, the
//! client, the server, and session batching.

pub mod client;
pub mod server;
pub mod session;
pub mod tokens;

pub use client::{DianaClient, SearchRequest, UpdateRequest, TREE_DEPTH};
pub use server::DianaServer;
pub use session::UpdateSession;
pub use tokens::derive_update_token;
