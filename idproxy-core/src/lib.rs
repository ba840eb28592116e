//! idproxy - an authenticating reverse proxy
//!
//! Forwards every inbound HTTP request to one fixed upstream, attaching a
//! freshly obtained identity token as a bearer credential, and relays the
//! response back.
//!
//! The main components are organized into the following modules:
//! - `client`: The shared, pooled outbound transport
//! - `error`: Error types
//! - `forwarder`: Destination resolution, header rewriting and dispatch
//! - `relay`: Copying upstream responses back to the caller
//! - `server`: Connection accept loop
//! - `service`: The hyper service tying forwarder and relay together
//! - `token`: Bearer credential providers and caching
//! - `upstream`: The upstream target
//! - `utils`: URI reference resolution

pub mod client;
pub mod error;
pub mod forwarder;
pub mod relay;
pub mod server;
pub mod service;
pub mod token;
pub mod upstream;
pub mod utils;
pub use hyper;
