//! Quarry Test - Shared test utilities for the quarry plugin loader.
//!
//! This crate provides mock collaborators and filesystem fixtures that can
//! be used across quarry crates as a dev-dependency.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use quarry_plugins::PluginValue;
//! use quarry_test::{MockEngine, MockToolchain, TestWorkspace};
//!
//! #[test]
//! fn loads_once() {
//!     let ws = TestWorkspace::new();
//!     let root = ws.add_plugin("alpha", r#"{"ping": "pong"}"#);
//!
//!     let engine = MockEngine::new();
//!     let loader = ws.loader(Arc::new(engine.clone()), Arc::new(MockToolchain::new()));
//!     let location = loader.locate(root).unwrap();
//!
//!     loader.load_one::<PluginValue>(&location).unwrap();
//!     loader.load_one::<PluginValue>(&location).unwrap();
//!     assert_eq!(engine.evaluation_count(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
