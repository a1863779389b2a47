//! shipwright-lib: build, release and fetch pipeline for binary artifacts
//!
//! - `compile`: bounded worker pool driving an external toolchain
//! - `release`: gzip upload of artifact trees, checksum manifests and
//!   environment pointers in a blob store
//! - `download`: caching HTTP downloader with per-attempt timeouts and retry
//! - `resolve`: reads pointers and manifests back and fetches a verified
//!   binary for a platform

pub mod blob;
pub mod compile;
pub mod config;
pub mod consts;
pub mod download;
pub mod platform;
pub mod release;
pub mod resolve;
pub mod util;
