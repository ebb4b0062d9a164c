//! Uploaded file parts, held in memory or in a scratch directory for the
//! lifetime of one request.

use std::error::Error as StdError;
use std::io;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use futures::{pin_mut, Stream, TryStreamExt};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::{ServerSettings, StorageKind};

/// Most files a single request may attach.
pub const MAX_ATTACHMENTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("too many attachments: at most {max} files are allowed")]
    TooMany { max: usize },

    #[error("failed to read upload {name}: {reason}")]
    Read { name: String, reason: String },

    #[error("failed to store upload: {0}")]
    Io(#[from] io::Error),
}

/// Storage policy, selected at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoragePolicy {
    Memory,
    Disk { dir: PathBuf },
}

impl From<&ServerSettings> for StoragePolicy {
    fn from(settings: &ServerSettings) -> Self {
        match settings.upload_storage {
            StorageKind::Memory => StoragePolicy::Memory,
            StorageKind::Disk => StoragePolicy::Disk {
                dir: settings.upload_dir.clone(),
            },
        }
    }
}

/// A file written to the upload directory. Removed when dropped.
#[derive(Debug)]
pub struct TempUpload {
    path: Option<PathBuf>,
}

impl TempUpload {
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn remove(mut self) {
        if let Some(path) = self.path.take() {
            if let Err(err) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), "failed to remove upload: {err}");
            }
        }
    }
}

impl Drop for TempUpload {
    // Only reached on early-exit paths; dispatch removes files through `remove`.
    // Blocking unlink so the file is gone by the time the guard is.
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), "failed to remove upload: {err}");
            }
        }
    }
}

#[derive(Debug)]
pub enum ByteSource {
    Memory(Bytes),
    Disk(TempUpload),
}

/// One uploaded file.
#[derive(Debug)]
pub struct UploadedPart {
    /// Filename as sent by the client.
    pub original_name: String,
    /// Content type as sent by the client, unvalidated.
    pub content_type: Option<String>,
    pub data: ByteSource,
}

impl UploadedPart {
    pub async fn read(&self) -> io::Result<Vec<u8>> {
        match &self.data {
            ByteSource::Memory(bytes) => Ok(bytes.to_vec()),
            ByteSource::Disk(upload) => match upload.path() {
                Some(path) => tokio::fs::read(path).await,
                None => Err(io::Error::new(io::ErrorKind::NotFound, "upload already removed")),
            },
        }
    }

    /// Path of the backing file under the disk policy.
    pub fn path(&self) -> Option<&Path> {
        match &self.data {
            ByteSource::Memory(_) => None,
            ByteSource::Disk(upload) => upload.path(),
        }
    }

    /// Release the part, deleting its backing file if there is one.
    pub async fn discard(self) {
        if let ByteSource::Disk(upload) = self.data {
            upload.remove().await;
        }
    }
}

/// Accepts uploaded parts according to the configured [`StoragePolicy`].
#[derive(Debug, Clone)]
pub struct AttachmentCollector {
    policy: StoragePolicy,
    max_count: usize,
}

impl AttachmentCollector {
    pub fn new(policy: StoragePolicy) -> Self {
        AttachmentCollector {
            policy,
            max_count: MAX_ATTACHMENTS,
        }
    }

    pub fn policy(&self) -> &StoragePolicy {
        &self.policy
    }

    /// Start collecting the parts of one request.
    pub fn start(&self) -> Collection<'_> {
        Collection {
            collector: self,
            parts: Vec::new(),
        }
    }
}

/// Parts collected so far for one request.
pub struct Collection<'a> {
    collector: &'a AttachmentCollector,
    parts: Vec<UploadedPart>,
}

impl Collection<'_> {
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Store one part from a stream of chunks.
    ///
    /// Fails with [`AttachmentError::TooMany`] before reading anything once the
    /// limit is reached. Already stored parts are dropped with the collection.
    pub async fn store<S, E>(
        &mut self,
        original_name: String,
        content_type: Option<String>,
        stream: S,
    ) -> Result<(), AttachmentError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: StdError,
    {
        if self.parts.len() >= self.collector.max_count {
            return Err(AttachmentError::TooMany {
                max: self.collector.max_count,
            });
        }

        pin_mut!(stream);
        let read_err = |err: E| AttachmentError::Read {
            name: original_name.clone(),
            reason: err.to_string(),
        };

        let data = match &self.collector.policy {
            StoragePolicy::Memory => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.try_next().await.map_err(read_err)? {
                    buf.extend_from_slice(&chunk);
                }
                ByteSource::Memory(buf.freeze())
            }
            StoragePolicy::Disk { dir } => {
                tokio::fs::create_dir_all(dir).await?;
                let path = dir.join(scratch_name(&original_name));
                let mut file = tokio::fs::File::create(&path).await?;
                // Owned from here on, so any early return below removes the file.
                let upload = TempUpload { path: Some(path) };
                while let Some(chunk) = stream.try_next().await.map_err(read_err)? {
                    file.write_all(&chunk).await?;
                }
                file.flush().await?;
                ByteSource::Disk(upload)
            }
        };

        tracing::debug!(name = %original_name, "stored attachment");
        self.parts.push(UploadedPart {
            original_name,
            content_type,
            data,
        });
        Ok(())
    }

    pub fn finish(self) -> Vec<UploadedPart> {
        self.parts
    }
}

/// `<unix-millis>-<uuid>-<name>`, where `name` is the last path component of the
/// client filename with anything outside `[A-Za-z0-9._-]` replaced.
fn scratch_name(original_name: &str) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let sanitized: String = base
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    let sanitized = if sanitized.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        sanitized
    };
    format!(
        "{}-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        sanitized
    )
}
