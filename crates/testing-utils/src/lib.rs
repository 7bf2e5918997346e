//! # JobProc Testing Utils
//!
//! Shared testing utilities for the jobproc workspace.
//!
//! - **Mock Repositories**: in-memory implementations of every repository trait
//! - **ManualTriggerService**: a trigger service fired explicitly by tests
//! - **FakePackageBackend**: in-process plugin packages with call counters
//! - **Builders and helpers**: job builder, package files on disk, polling helpers
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! jobproc-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod fakes;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use fakes::*;
pub use helpers::*;
pub use mocks::*;
