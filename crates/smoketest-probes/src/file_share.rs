//! Shared volume probe (SMB, NFS)
//!
//! Writes a file into the mounted share and reads it back.

use anyhow::{bail, Context};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::bindings::{Binding, BindingError};
use smoketest_core::{Probe, StepLog, TestResult};

pub const NFS_KEY: &str = "nfs";
pub const NFS_NAME: &str = "NFS";

/// File written on NFS shares
pub const NFS_FILE: &str = "prodsmoketestfile";

/// Mounted share probe
pub struct FileShareProbe {
    key: String,
    name: String,
    mount_dir: PathBuf,
    file_name: Option<String>,
}

impl FileShareProbe {
    /// Probe writing `file_name` below `mount_dir`.
    ///
    /// A missing file name fails the write step instead of skipping the
    /// probe, since the share itself is bound.
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        mount_dir: impl Into<PathBuf>,
        file_name: Option<String>,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            mount_dir: mount_dir.into(),
            file_name: file_name.filter(|f| !f.trim().is_empty()),
        }
    }

    /// Mount directory of a volume service binding
    pub fn mount_dir(binding: &Binding) -> Result<PathBuf, BindingError> {
        Ok(PathBuf::from(&binding.first_mount()?.container_dir))
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.file_name.as_ref().map(|f| self.mount_dir.join(f))
    }
}

async fn write_file(path: &Path, content: &str) -> anyhow::Result<()> {
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

async fn read_file(path: &Path, expected: &str) -> anyhow::Result<()> {
    let read = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    if read != expected {
        bail!("Read content differs from written content");
    }
    Ok(())
}

#[async_trait]
impl Probe for FileShareProbe {
    fn key(&self) -> &str {
        &self.key
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> TestResult {
        let mut steps = StepLog::new();
        let content = format!("test {}", chrono::Utc::now().timestamp());

        let written = match self.path() {
            Some(path) => steps
                .run("Write file", write_file(&path, &content))
                .await
                .map(|_| path),
            None => {
                steps.fail("Write file", "No file name configured for this share");
                None
            }
        };

        if let Some(path) = written {
            steps.run("Read file back", read_file(&path, &content)).await;
        }

        steps.finish(self.key.clone(), self.name.clone())
    }
}
