//! Bounded worker pool compiling queued work items.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};

use tempfile::TempDir;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::toolchain::Toolchain;
use super::types::{CompileError, WorkItem};
use crate::consts::{APP_NAME, DEFAULT_PARALLELISM};

/// Where binaries are written.
enum BuildDir {
  /// Temporary directory removed by `cleanup`.
  Owned(TempDir),
  /// Caller-provided directory left in place by `cleanup`.
  Borrowed(PathBuf),
}

/// Compiles queued work items with a fixed number of concurrent workers.
///
/// The queue belongs to the compiler value. Workers are spawned per
/// [`Compiler::run`] and pull items until the queue is empty or the run is
/// cancelled.
pub struct Compiler {
  parallelism: usize,
  toolchain: Arc<dyn Toolchain>,
  queue: Arc<Mutex<VecDeque<WorkItem>>>,
  build_dir: Mutex<Option<BuildDir>>,
  base: PathBuf,
}

impl Compiler {
  /// Create a compiler writing into a fresh temporary directory.
  pub fn new(toolchain: impl Toolchain) -> Result<Self, CompileError> {
    let dir = tempfile::Builder::new()
      .prefix(&format!("{}-build-", APP_NAME))
      .tempdir()
      .map_err(|source| CompileError::BuildDir {
        path: std::env::temp_dir(),
        source,
      })?;
    let base = dir.path().to_path_buf();
    Ok(Self::from_parts(toolchain, BuildDir::Owned(dir), base))
  }

  /// Create a compiler writing into `dir`, which survives `cleanup`.
  pub fn in_dir(dir: impl Into<PathBuf>, toolchain: impl Toolchain) -> Result<Self, CompileError> {
    let base = dir.into();
    std::fs::create_dir_all(&base).map_err(|source| CompileError::BuildDir {
      path: base.clone(),
      source,
    })?;
    Ok(Self::from_parts(toolchain, BuildDir::Borrowed(base.clone()), base))
  }

  fn from_parts(toolchain: impl Toolchain, build_dir: BuildDir, base: PathBuf) -> Self {
    Self {
      parallelism: DEFAULT_PARALLELISM,
      toolchain: Arc::new(toolchain),
      queue: Arc::new(Mutex::new(VecDeque::new())),
      build_dir: Mutex::new(Some(build_dir)),
      base,
    }
  }

  /// Set the number of workers started by `run` (at least one).
  pub fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.parallelism = parallelism.max(1);
    self
  }

  pub fn parallelism(&self) -> usize {
    self.parallelism
  }

  /// Directory all binaries are written under.
  pub fn base_dir(&self) -> &Path {
    &self.base
  }

  /// Queue a work item.
  ///
  /// Items whose output slot is already filled are skipped. Queuing an item
  /// with the same output path as a pending one replaces the pending one.
  pub fn add(&self, item: WorkItem) {
    if item.is_done() {
      debug!(name = %item.name, "output already built, skipping");
      return;
    }

    let output = item.output_path(&self.base);
    let mut queue = lock(&self.queue);
    if let Some(pending) = queue.iter_mut().find(|p| p.output_path(&self.base) == output) {
      debug!(output = %output.display(), "replacing queued work item");
      *pending = item;
    } else {
      queue.push_back(item);
    }
  }

  /// Number of queued items not yet picked up by a worker.
  pub fn pending(&self) -> usize {
    lock(&self.queue).len()
  }

  /// Compile everything in the queue.
  ///
  /// Starts exactly `parallelism` workers. The first failing job cancels the
  /// run: other workers finish or kill their current job and take no new
  /// ones, and that first error is returned. On success the output paths of
  /// all jobs are returned, sorted.
  pub async fn run(&self, ctx: &CancellationToken) -> Result<Vec<PathBuf>, CompileError> {
    if lock(&self.build_dir).is_none() {
      return Err(CompileError::CleanedUp);
    }

    let shared = ctx.child_token();
    let mut workers = JoinSet::new();

    info!(jobs = self.pending(), workers = self.parallelism, "starting compile run");

    for id in 0..self.parallelism {
      let queue = self.queue.clone();
      let toolchain = self.toolchain.clone();
      let base = self.base.clone();
      let cancel = shared.clone();
      workers.spawn(async move { worker(id, queue, toolchain, base, cancel).await });
    }

    let mut built = Vec::new();
    let mut first_error: Option<CompileError> = None;

    while let Some(joined) = workers.join_next().await {
      let result = joined.unwrap_or_else(|e| Err(CompileError::Worker(e.to_string())));
      match result {
        Ok(paths) => built.extend(paths),
        Err(e) => {
          shared.cancel();
          // A sibling stopping because of the cancellation must not mask the
          // error that caused it.
          let replace = match &first_error {
            None => true,
            Some(CompileError::Cancelled) => !matches!(e, CompileError::Cancelled),
            Some(_) => false,
          };
          if replace {
            first_error = Some(e);
          }
        }
      }
    }

    if let Some(e) = first_error {
      error!(error = %e, "compile run failed");
      return Err(e);
    }

    built.sort();
    info!(built = built.len(), "compile run complete");
    Ok(built)
  }

  /// Release the build directory and drop queued work.
  ///
  /// Only the first call has an effect. A temporary build directory is
  /// deleted; a caller-provided one is left in place.
  pub fn cleanup(&self) -> Result<(), CompileError> {
    let dropped = {
      let mut queue = lock(&self.queue);
      let count = queue.len();
      queue.clear();
      count
    };
    if dropped > 0 {
      debug!(dropped, "discarded queued work items");
    }

    match lock(&self.build_dir).take() {
      Some(BuildDir::Owned(dir)) => {
        let path = dir.path().to_path_buf();
        dir.close().map_err(|source| CompileError::BuildDir { path, source })
      }
      Some(BuildDir::Borrowed(_)) | None => Ok(()),
    }
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn worker(
  id: usize,
  queue: Arc<Mutex<VecDeque<WorkItem>>>,
  toolchain: Arc<dyn Toolchain>,
  base: PathBuf,
  cancel: CancellationToken,
) -> Result<Vec<PathBuf>, CompileError> {
  let mut built = Vec::new();

  loop {
    if cancel.is_cancelled() {
      debug!(worker = id, "run cancelled, worker stopping");
      return Err(CompileError::Cancelled);
    }

    let Some(item) = lock(&queue).pop_front() else {
      break;
    };

    match compile_one(&item, toolchain.as_ref(), &base, &cancel).await {
      Ok(path) => built.push(path),
      Err(e) => {
        cancel.cancel();
        return Err(e);
      }
    }
  }

  Ok(built)
}

async fn compile_one(
  item: &WorkItem,
  toolchain: &dyn Toolchain,
  base: &Path,
  cancel: &CancellationToken,
) -> Result<PathBuf, CompileError> {
  let output = item.output_path(base);
  if let Some(parent) = output.parent() {
    tokio::fs::create_dir_all(parent).await?;
  }

  info!(name = %item.name, target = %item.target, coverage = item.coverage, "compiling");

  let mut command = toolchain.command(item, &output);
  command
    .stdin(Stdio::null())
    .stdout(Stdio::inherit())
    .stderr(Stdio::inherit())
    .kill_on_drop(true);

  let mut child = command.spawn().map_err(|source| CompileError::Spawn {
    name: item.name.clone(),
    source,
  })?;

  let status = tokio::select! {
    status = child.wait() => status?,
    _ = cancel.cancelled() => {
      warn!(name = %item.name, "cancelled, killing toolchain");
      let _ = child.kill().await;
      return Err(CompileError::Cancelled);
    }
  };

  if !status.success() {
    return Err(CompileError::Failed {
      name: item.name.clone(),
      output,
      code: status.code(),
    });
  }

  if let Some(slot) = &item.output {
    let _ = slot.set(output.clone());
  }

  debug!(output = %output.display(), "compiled");
  Ok(output)
}
