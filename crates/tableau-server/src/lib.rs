//! Development server with hot reload for tableau.
//!
//! The server owns the HTTP side of a dev session. Builders attach to it
//! through [`ServerMount`], which implements the builder's `DevMount`.

pub mod mount;
pub mod server;
pub mod websocket;

pub use mount::{PublishedFiles, ServerMount};
pub use server::{DevServer, DevServerConfig, ServerError, TlsConfig};
pub use websocket::{HmrHub, HmrMessage};
