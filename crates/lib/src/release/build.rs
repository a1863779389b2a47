//! Build stage: one work item per platform in the matrix.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::types::{BuildRequest, ReleaseError};
use crate::compile::{Compiler, Toolchain, WorkItem};

/// Compile `request.name` for every platform of `request.matrix`.
///
/// Binaries land in `<out_dir>/<os>-<arch>/<name><suffix>`, the layout
/// [`Releaser::publish`](super::Releaser::publish) uploads as-is. Returns the
/// built paths, sorted.
pub async fn build_matrix(
  ctx: &CancellationToken,
  request: &BuildRequest,
  toolchain: impl Toolchain,
) -> Result<Vec<PathBuf>, ReleaseError> {
  if request.matrix.is_empty() {
    return Err(ReleaseError::InvalidRequest("platform matrix is empty".to_string()));
  }

  let compiler = Compiler::in_dir(request.out_dir.clone(), toolchain)?.with_parallelism(request.parallelism);
  for platform in request.matrix.platforms() {
    let mut item = WorkItem::builder(request.name.clone())
      .target(platform.target_dir())
      .source(request.source.clone())
      .platform(platform)
      .envs(request.env.clone())
      .coverage(request.coverage);
    if let Some(ldflags) = &request.ldflags {
      item = item.ldflags(ldflags.clone());
    }
    compiler.add(item.build()?);
  }

  info!(name = %request.name, platforms = request.matrix.len(), "building release matrix");
  let built = compiler.run(ctx).await;
  compiler.cleanup()?;
  Ok(built?)
}
