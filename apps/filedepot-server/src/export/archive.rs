//! Streaming zip assembly
//!
//! The zip encoder writes into a small in-memory spill buffer that is drained
//! into the destination [`BlobWriter`] after every source chunk, so at most
//! one chunk of any input object is resident at a time.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use thiserror::Error;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::error::StorageError;
use crate::storage::{BlobStorage, BlobWriter};

/// One object to copy into the archive
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    pub file_name: String,
    pub path: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    /// Entries written as a placeholder because the source was missing
    pub missing: usize,
    /// Entries whose source could not be read completely
    pub failed: usize,
    /// Size of the finished archive
    pub bytes: u64,
}

/// Faults that abort the whole archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive sink failed: {0}")]
    Sink(#[from] StorageError),

    #[error("zip encoding failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("zip encoding failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared byte buffer the zip encoder writes into
#[derive(Clone, Default)]
struct SpillBuffer(Arc<Mutex<Vec<u8>>>);

impl SpillBuffer {
    fn take(&self) -> Bytes {
        Bytes::from(std::mem::take(&mut *self.0.lock()))
    }
}

impl Write for SpillBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Move whatever the encoder produced so far into the sink
async fn drain(buffer: &SpillBuffer, sink: &mut Box<dyn BlobWriter>) -> Result<(), StorageError> {
    let pending = buffer.take();
    if pending.is_empty() {
        return Ok(());
    }
    sink.write(pending).await
}

pub fn missing_placeholder(file_name: &str) -> String {
    format!("Error: Content missing for {}", file_name)
}

/// Hand out entry names, suffixing repeats as `name (1).ext`, `name (2).ext`
#[derive(Default)]
pub struct EntryNames {
    seen: HashMap<String, usize>,
}

impl EntryNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unique(&mut self, file_name: &str) -> String {
        let base = entry_base_name(file_name);
        let mut candidate = base.clone();

        while let Some(count) = self.seen.get_mut(&candidate.to_lowercase()) {
            *count += 1;
            candidate = with_suffix(&base, *count);
        }

        self.seen.insert(candidate.to_lowercase(), 0);
        candidate
    }
}

/// Last path component, so entries never nest or escape the archive root
fn entry_base_name(file_name: &str) -> String {
    let name = file_name
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty() && *part != "." && *part != "..")
        .unwrap_or("");

    if name.is_empty() {
        "file".to_string()
    } else {
        name.to_string()
    }
}

fn with_suffix(name: &str, n: usize) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({}){}", &name[..dot], n, &name[dot..]),
        _ => format!("{} ({})", name, n),
    }
}

/// Copy `sources`, in order, into a zip written through `sink`
///
/// A missing source becomes a placeholder entry; a source that fails mid-read
/// keeps whatever was copied and the archive moves on. Only sink and encoder
/// faults abort, and they abort the sink with them. `on_entry(done, total)`
/// runs after each entry.
pub async fn write_archive(
    storage: &dyn BlobStorage,
    mut sink: Box<dyn BlobWriter>,
    sources: &[ArchiveSource],
    on_entry: impl FnMut(usize, usize) + Send,
) -> Result<ArchiveSummary, ArchiveError> {
    let mut summary = match encode_entries(storage, &mut sink, sources, on_entry).await {
        Ok(summary) => summary,
        Err(e) => {
            sink.abort().await;
            return Err(e);
        }
    };

    summary.bytes = sink.finish().await?;
    Ok(summary)
}

async fn encode_entries(
    storage: &dyn BlobStorage,
    sink: &mut Box<dyn BlobWriter>,
    sources: &[ArchiveSource],
    mut on_entry: impl FnMut(usize, usize) + Send,
) -> Result<ArchiveSummary, ArchiveError> {
    let buffer = SpillBuffer::default();
    let mut zip = ZipWriter::new_stream(buffer.clone());
    let mut names = EntryNames::new();
    let mut summary = ArchiveSummary::default();

    for (index, source) in sources.iter().enumerate() {
        let entry_name = names.unique(&source.file_name);
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(source.size_bytes >= u32::MAX as u64);

        zip.start_file(entry_name.as_str(), options)?;
        drain(&buffer, sink).await?;

        match storage.open_read(&source.path).await {
            Ok(Some(mut stream)) => {
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(chunk) => {
                            zip.write_all(&chunk)?;
                            drain(&buffer, sink).await?;
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Failed reading {} into export entry {}: {}",
                                source.path,
                                entry_name,
                                e
                            );
                            summary.failed += 1;
                            break;
                        }
                    }
                }
            }
            Ok(None) => {
                tracing::warn!("Export source missing: {}", source.path);
                zip.write_all(missing_placeholder(&source.file_name).as_bytes())?;
                drain(&buffer, sink).await?;
                summary.missing += 1;
            }
            Err(e) => {
                tracing::warn!("Failed opening export source {}: {}", source.path, e);
                summary.failed += 1;
            }
        }

        summary.entries += 1;
        on_entry(index + 1, sources.len());
    }

    zip.finish()?;
    drain(&buffer, sink).await?;

    Ok(summary)
}
