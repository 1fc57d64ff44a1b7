//! Multi-language code execution core for Citadel workflows.
//!
//! This crate runs user-supplied snippets in nine language toolchains and
//! hosts workflow nodes implemented as separate plugin executables. Every
//! snippet runs as a child process in a throwaway workspace with a deadline
//! and a cancellation token; nothing is executed in-process.
//!
//! # Architecture Overview
//!
//! - **Runtimes**: per-language validation, wrapping and process execution behind one trait
//! - **Runtime manager**: alias resolution, default timeouts and lifecycle for all runtimes
//! - **Plugins**: handshake and newline-delimited JSON RPC over a child's stdio
//! - **Nodes**: workflow adapters that map input maps onto runtime or plugin calls
//! - **Configuration**: YAML settings with environment overrides

pub mod config;
pub mod errors;
pub mod nodes;
pub mod plugins;
pub mod runtimes;

pub use config::*;
pub use errors::{ConfigError, ManagerError, NodeError, PluginError, RuntimeError};
pub use nodes::{CodeNode, MultiRuntimeNode, Node, PluginNode};
pub use plugins::{NodeMetadata, NodePlugin, PluginClient, PluginManager};
pub use runtimes::{ExecutionResult, Inputs, Runtime, RuntimeManager, RuntimeType};
