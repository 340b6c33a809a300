//! Tuneport - plugin runtime for a music player
//!
//! This library provides the core of a source-aggregating player:
//! - Sandboxed loading of user-installed source plugins
//! - Persistent registry with enable/order/user-variable metadata
//! - Concurrent dispatch of capabilities across plugins
//! - Aggregated search, charts, recommendations, and link import
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   PluginHost                         │
//! │   install  │  list  │  search  │  import  │  ...    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   Dispatcher                         │
//! │   fan-out  │  routing  │  item normalization        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Registry                          │
//! │   Loader (rhai sandbox)  │  SQLite metadata         │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod host;
pub mod plugins;
pub mod services;

pub use config::Config;
pub use db::{DbConn, DbPool, PluginMetaRepo};
pub use error::{Error, Result};
pub use host::{Envelope, PluginHost, PluginSummary};
pub use plugins::{
    Capability, InstallOptions, InstallOutcome, InstallStatus, Loader, Module, ModuleState,
    Registry, RegistryEvent, UpdateOutcome,
};
pub use services::{
    Dispatcher, ImportKind, MediaItem, MediaType, Quality, SearchOptions, SearchResult,
};
