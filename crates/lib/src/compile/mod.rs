//! Parallel compilation of build jobs.
//!
//! Work items are queued on a [`Compiler`] and built by a bounded pool of
//! workers, each invoking the configured [`Toolchain`] as a subprocess.

pub mod pool;
pub mod toolchain;
pub mod types;

pub use pool::Compiler;
pub use toolchain::{COVERAGE_BUILD_TAG, GoToolchain, Toolchain};
pub use types::{CompileError, OutputSlot, WorkItem, WorkItemBuilder};
