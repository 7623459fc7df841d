use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::Error;

/// Filesystem artifact store rooted at the app's data directory.
pub struct FsStore {
  root: PathBuf,
  client: reqwest::Client,
}

impl FsStore {
  /// Create a store rooted at the given directory. Directories are
  /// created lazily on first write.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      client: reqwest::Client::new(),
    }
  }

  /// The managed root directory.
  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Directory holding one execution's snapshots and downloaded results.
  pub fn execution_dir(&self, workflow_id: &str, execution_id: &str) -> PathBuf {
    self
      .root
      .join("executions")
      .join(workflow_id)
      .join(execution_id)
  }

  /// The user uploads directory.
  pub fn uploads_dir(&self) -> PathBuf {
    self.root.join("uploads")
  }

  /// The user-level asset library.
  pub fn library_dir(&self) -> PathBuf {
    self.root.join("library")
  }

  /// Write a JSON snapshot (`inputs`, `params`, `metadata`) into the
  /// execution's directory.
  pub async fn write_snapshot(
    &self,
    workflow_id: &str,
    execution_id: &str,
    name: &str,
    value: &serde_json::Value,
  ) -> Result<PathBuf, Error> {
    let dir = self.execution_dir(workflow_id, execution_id);
    fs::create_dir_all(&dir).await?;

    let path = dir.join(format!("{}.json", name));
    let data = serde_json::to_vec_pretty(value)?;
    fs::write(&path, data).await?;
    Ok(path)
  }

  /// Read a snapshot back.
  pub async fn read_snapshot(
    &self,
    workflow_id: &str,
    execution_id: &str,
    name: &str,
  ) -> Result<serde_json::Value, Error> {
    let path = self
      .execution_dir(workflow_id, execution_id)
      .join(format!("{}.json", name));
    if !path.exists() {
      return Err(Error::NotFound(path.display().to_string()));
    }
    let data = fs::read(&path).await?;
    Ok(serde_json::from_slice(&data)?)
  }

  /// Download a result URL into the execution's directory. Returns the
  /// local path.
  pub async fn download_result(
    &self,
    workflow_id: &str,
    execution_id: &str,
    url: &str,
  ) -> Result<PathBuf, Error> {
    let dir = self.execution_dir(workflow_id, execution_id);
    fs::create_dir_all(&dir).await?;

    let file_name = file_name_from_url(url);
    let path = dir.join(file_name);

    let response = self.client.get(url).send().await?.error_for_status()?;
    let bytes = response.bytes().await?;
    fs::write(&path, &bytes).await?;

    debug!(url, path = %path.display(), "result downloaded");
    Ok(path)
  }

  /// Copy a local result file into the user asset library.
  pub async fn save_to_library(&self, source: &Path) -> Result<PathBuf, Error> {
    if !source.exists() {
      return Err(Error::NotFound(source.display().to_string()));
    }
    let dir = self.library_dir();
    fs::create_dir_all(&dir).await?;

    let file_name = source
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "asset".to_string());
    let dest = dir.join(file_name);
    fs::copy(source, &dest).await?;
    Ok(dest)
  }

  /// List files in the uploads directory.
  pub async fn list_uploads(&self) -> Result<Vec<PathBuf>, Error> {
    let dir = self.uploads_dir();
    let mut uploads = Vec::new();
    if !dir.exists() {
      return Ok(uploads);
    }

    let mut entries = fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
      if entry.path().is_file() {
        uploads.push(entry.path());
      }
    }
    uploads.sort();
    Ok(uploads)
  }

  /// Copy an external file into the uploads directory. Returns the
  /// managed path.
  pub async fn copy_upload(&self, source: &Path) -> Result<PathBuf, Error> {
    if !source.exists() {
      return Err(Error::NotFound(source.display().to_string()));
    }
    let dir = self.uploads_dir();
    fs::create_dir_all(&dir).await?;

    let file_name = source
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "upload".to_string());
    let dest = dir.join(file_name);
    fs::copy(source, &dest).await?;
    Ok(dest)
  }

  /// Total bytes under the managed root.
  pub async fn disk_usage(&self) -> Result<u64, Error> {
    if !self.root.exists() {
      return Ok(0);
    }
    dir_size(self.root.clone()).await
  }

  /// Remove every stored file belonging to a workflow.
  pub async fn delete_workflow_files(&self, workflow_id: &str) -> Result<(), Error> {
    let dir = self.root.join("executions").join(workflow_id);
    if dir.exists() {
      fs::remove_dir_all(&dir).await?;
    }
    Ok(())
  }

  /// Remove one execution's directory.
  pub async fn delete_execution_files(
    &self,
    workflow_id: &str,
    execution_id: &str,
  ) -> Result<(), Error> {
    let dir = self.execution_dir(workflow_id, execution_id);
    if dir.exists() {
      fs::remove_dir_all(&dir).await?;
    }
    Ok(())
  }

  /// Whether a path relative to the managed root exists.
  pub async fn artifact_exists(&self, relative: &Path) -> bool {
    self.root.join(relative).exists()
  }
}

/// Derive a local file name from the tail of a URL, falling back to a
/// generic name when the URL has no usable path segment.
fn file_name_from_url(url: &str) -> String {
  let trimmed = url.split(['?', '#']).next().unwrap_or(url);
  trimmed
    .rsplit('/')
    .next()
    .filter(|name| !name.is_empty() && !name.contains(':'))
    .map(|name| name.to_string())
    .unwrap_or_else(|| "result.bin".to_string())
}

/// Recursively sum file sizes under a directory.
async fn dir_size(dir: PathBuf) -> Result<u64, Error> {
  let mut total = 0u64;
  let mut pending = vec![dir];

  while let Some(current) = pending.pop() {
    let mut entries = fs::read_dir(&current).await?;
    while let Some(entry) = entries.next_entry().await? {
      let metadata = entry.metadata().await?;
      if metadata.is_dir() {
        pending.push(entry.path());
      } else {
        total += metadata.len();
      }
    }
  }

  Ok(total)
}
