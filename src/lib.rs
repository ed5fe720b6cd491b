#![forbid(unsafe_code)]
//! Task-graph asset pipeline.
//!
//! `gusto` wires third-party tools (SCSS compiler, template engine, JS/CSS/HTML
//! minifiers, image optimizer, dev server with live reload, object-storage
//! publisher) into named build tasks with explicit dependencies. The task graph
//! is an explicit object constructed once at startup; there is no ambient
//! global registry.

pub mod config;
mod error;
pub mod graph;
mod hash;
pub mod io;
pub mod minify;
pub mod pipeline;
pub mod publish;
pub mod revision;
pub mod styles;
pub mod templates;
pub mod transform;
pub mod watch;

pub use crate::config::Config;
pub use crate::error::*;
pub use crate::graph::TaskGraph;

/// This value controls whether the pipeline runs in the `Build` or the `Watch`
/// mode. In `Build` mode, every task runs just once and the process stops. In
/// `Watch` mode, the pipeline serves the source directory over HTTP, opens up
/// a websocket port, and re-runs the relevant task whenever a watched file
/// changes, pushing a live-reload signal to connected clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A one-time build.
    Build,
    /// A continuous watch mode for development.
    Watch,
}

/// Shared state passed to every task action.
///
/// Owned by the orchestrating process and passed by reference to the runner;
/// tasks never mutate it.
#[derive(Debug, Clone)]
pub struct Context {
    /// The current mode (Build or Watch).
    pub mode: Mode,
    /// The port of the live-reload websocket (if running).
    pub port: Option<u16>,
    /// Loaded configuration.
    pub config: Config,
}

impl Context {
    pub fn new(config: Config, mode: Mode) -> Self {
        Self {
            mode,
            port: None,
            config,
        }
    }
}
