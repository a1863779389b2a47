//! Test utilities for shipwright-lib.
//!
//! Provides a stand-in toolchain so compile tests never need a real compiler.

#![cfg(unix)]

use std::path::Path;

use tokio::process::Command;

use crate::compile::{Toolchain, WorkItem};

/// Toolchain that "compiles" an item into a shell script echoing the item
/// name followed by its arguments.
#[derive(Debug, Default, Clone)]
pub struct EchoToolchain {
  fail: Option<String>,
  slow: Option<String>,
}

impl EchoToolchain {
  /// Same as the default, but the item named `name` exits with code 3 after
  /// a short pause.
  pub fn failing(name: &str) -> Self {
    Self {
      fail: Some(name.to_string()),
      slow: None,
    }
  }

  /// The item named `name` sleeps for 30 seconds before building.
  pub fn slow(mut self, name: &str) -> Self {
    self.slow = Some(name.to_string());
    self
  }
}

impl Toolchain for EchoToolchain {
  fn command(&self, item: &WorkItem, output: &Path) -> Command {
    let mut command = Command::new("/bin/sh");
    if self.fail.as_deref() == Some(item.name.as_str()) {
      command.arg("-c").arg("sleep 0.2; exit 3");
      return command;
    }

    let pause = if self.slow.as_deref() == Some(item.name.as_str()) {
      "sleep 30 && "
    } else {
      ""
    };
    command
      .arg("-c")
      .arg(format!(
        r#"{}printf '#!/bin/sh\necho %s "$@"\n' "$NAME" > "$OUT" && chmod +x "$OUT""#,
        pause
      ))
      .env("NAME", &item.name)
      .env("OUT", output);
    command
  }
}
