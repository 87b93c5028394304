//! Batched JSON output for extracted items.
//!
//! With `chunk_size = k > 0` every `k` items become one immutable file,
//! `{output_path}_{n}.json`, with `n` increasing across the life of the
//! output directory. With `chunk_size = 0` all items of a run go to
//! `{output_path}.json`, written once at close.

use std::path::{Path, PathBuf};

use crate::checkpoint::write_atomic;
use crate::error::CrawlError;
use crate::models::Item;

/// In-memory item buffer with size-triggered flushes.
#[derive(Debug)]
pub struct ChunkWriter {
    output_path: PathBuf,
    chunk_size: usize,
    buffer: Vec<Item>,
    next_sequence: u64,
    chunks_written: u64,
}

impl ChunkWriter {
    /// Create a writer for `output_path` (without the `.json` suffix).
    ///
    /// In chunked mode, numbering continues after the highest chunk already
    /// on disk so a resumed run never overwrites an earlier chunk.
    pub fn open(output_path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        let output_path = output_path.into();
        let next_sequence = if chunk_size > 0 {
            existing_chunks(&output_path)
                .into_iter()
                .max()
                .map_or(0, |n| n + 1)
        } else {
            0
        };

        if next_sequence > 0 {
            tracing::info!(
                output = %output_path.display(),
                next_sequence,
                "Continuing chunk numbering after existing output"
            );
        }

        Self {
            output_path,
            chunk_size,
            buffer: Vec::new(),
            next_sequence,
            chunks_written: 0,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Chunk files successfully written by this writer.
    pub fn chunks_written(&self) -> u64 {
        self.chunks_written
    }

    /// Target file of the next flush.
    pub fn current_path(&self) -> PathBuf {
        if self.chunk_size > 0 {
            with_suffix(&self.output_path, &format!("_{}.json", self.next_sequence))
        } else {
            with_suffix(&self.output_path, ".json")
        }
    }

    /// Buffer an item, flushing when the chunk is full.
    ///
    /// A failed flush is logged and the items stay buffered for the next try.
    pub async fn append(&mut self, item: Item) {
        self.buffer.push(item);
        if self.chunk_size > 0 && self.buffer.len() >= self.chunk_size {
            let _ = self.flush_full_chunks().await;
        }
    }

    /// Write everything buffered and clear it.
    ///
    /// In chunked mode each file holds at most `chunk_size` items, so a
    /// buffer that grew during failed writes is split over several sequence
    /// numbers. Returns the last written path, or `None` when there was
    /// nothing to write.
    pub async fn flush(&mut self) -> Result<Option<PathBuf>, CrawlError> {
        let mut last = self.flush_full_chunks().await?;
        if !self.buffer.is_empty() {
            last = Some(self.write_batch(self.buffer.len()).await?);
        }
        Ok(last)
    }

    /// Write every complete chunk, leaving a partial tail buffered.
    async fn flush_full_chunks(&mut self) -> Result<Option<PathBuf>, CrawlError> {
        let mut last = None;
        while self.chunk_size > 0 && self.buffer.len() >= self.chunk_size {
            last = Some(self.write_batch(self.chunk_size).await?);
        }
        Ok(last)
    }

    /// Write the first `count` buffered items to the current path.
    async fn write_batch(&mut self, count: usize) -> Result<PathBuf, CrawlError> {
        let path = self.current_path();
        let result = match serde_json::to_vec_pretty(&self.buffer[..count]) {
            Ok(bytes) => write_atomic(&path, &bytes).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                tracing::info!(items = count, path = %path.display(), "Wrote output chunk");
                self.buffer.drain(..count);
                if self.chunk_size > 0 {
                    self.next_sequence += 1;
                }
                self.chunks_written += 1;
                Ok(path)
            }
            Err(e) => {
                tracing::error!(
                    items = self.buffer.len(),
                    path = %path.display(),
                    error = %e,
                    "Failed to write output chunk, keeping items buffered"
                );
                Err(e)
            }
        }
    }

    /// Flush whatever is left. A no-op on an empty buffer.
    pub async fn close(&mut self) -> Result<Option<PathBuf>, CrawlError> {
        self.flush().await
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s = base.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Sequence numbers of `{stem}_{n}.json` files next to `output_path`.
fn existing_chunks(output_path: &Path) -> Vec<u64> {
    let Some(stem) = output_path.file_name().and_then(|s| s.to_str()) else {
        return Vec::new();
    };
    let dir = match output_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let prefix = format!("{stem}_");
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            name.strip_prefix(&prefix)?
                .strip_suffix(".json")?
                .parse::<u64>()
                .ok()
        })
        .collect()
}
