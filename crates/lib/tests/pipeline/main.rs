//! End-to-end tests across publish, release, resolve and download.

mod common;
mod fetch_tests;
mod publish_tests;
