//! `relay-proxy`: an intercepting HTTP/1.1 reverse proxy with a
//! programmable flow pipeline.
//!
//! The crate is organized the way the component table in `SPEC_FULL.md`
//! lays it out: a hand-rolled wire parser (`proto`), a typed message model
//! (`message`), connection routing (`endpoint`, `dispatcher`), the flow DSL
//! flows are built from (`flow`), observation and persistence of traffic
//! (`reporting`, `persistence`), and the glue that starts a listener
//! (`config`, `server`, `loader`).

pub mod config;
pub mod default_flow;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod flow;
pub mod loader;
pub mod message;
pub mod persistence;
pub mod processing;
pub mod proto;
pub mod reporting;
pub mod server;

pub use error::{Error, Result};
