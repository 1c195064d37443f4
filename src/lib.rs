pub mod assign;
pub mod collab;
pub mod config;
mod confirm;
mod conflict;
pub mod error;
pub mod ledger;
pub mod resv;
pub mod server;
pub mod timer;

pub use config::ServerConfig;
pub use error::{ResvError, Result};
pub use server::ServerState;
