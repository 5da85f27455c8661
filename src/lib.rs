//! # WordPress Theme Builder
//!
//! Build pipeline that turns a theme source tree (`themes/<theme>/`) into an
//! installed theme inside a local WordPress tree (`public/`).
//!
//! ## Features
//!
//! - One-time WordPress install: download, unzip, rename, delete
//! - Template, stylesheet, script, image and catalog compilers
//! - Dependency-aware task graph with parallel execution
//! - Watch mode and a live-reload proxy for development
//! - Progress tracking with atomic counters
//!
//! ## Usage
//!
//! ```ignore
//! use wp_theme_builder::graph::{TaskGraph, TaskId};
//! use wp_theme_builder::tasks::{run_task, BuildContext};
//!
//! let graph = TaskGraph::for_targets(&[TaskId::Compile], config.needs_install())?;
//! let results = graph.execute(&[TaskId::Compile], |task| run_task(task, &ctx));
//! ```

/// Asset compilers
pub mod compilers;

/// CLI configuration and settings resolution
pub mod config;

/// File copying operations
pub mod copier;

/// Error types for build operations
pub mod error;

/// Task identifiers, dependency graph and scheduler
pub mod graph;

/// WordPress download and unpacking
pub mod installer;

/// Script and stylesheet minifiers
pub mod minify;

/// Source and destination locations
pub mod paths;

/// Source file discovery
pub mod scanner;

/// Live reload proxy
pub mod server;

/// Task bodies and build statistics
pub mod tasks;

/// Theme metadata
pub mod theme;

/// Source watching
pub mod watch;
