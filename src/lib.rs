//! Line-oriented chat relay.
//!
//! Clients log in with `LOGIN:<name>`; every line they send afterwards is
//! stamped by the server as `[HH:MM] <name>: <text>` and fanned out to every
//! other logged-in client.

pub mod broadcast;
pub mod config;
pub mod conn;
pub mod console;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod token;

pub use config::RelayConfig;
pub use error::{ErrorKind, RelayError};
pub use server::RelayServer;
