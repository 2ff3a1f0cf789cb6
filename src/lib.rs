//! polyexec daemon library
//!
//! Executes code snippets in several guest languages:
//! - Toolchain descriptors and the immutable language registry
//! - Per-request workspaces with guaranteed cleanup
//! - The compile-then-run pipeline and its process runner
//! - Resource governance (wall-clock timeout, virtual-memory ceiling)
//! - MCP server implementation using rmcp
//!
//! This is an execution engine, not a security sandbox: guest programs run
//! as ordinary host processes.

pub mod config;
pub mod error;
pub mod governor;
pub mod mcp;
pub mod outcome;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod toolchain;
pub mod workspace;

pub use outcome::{Classification, ExecutionOutcome, ExecutionRequest};
pub use pipeline::{Executor, ExecutorSettings};
pub use registry::LanguageRegistry;
