//! Streaming sitemap assembly.
//!
//! [`SitemapAssembler::assemble`] consumes the entries of one source from a
//! bounded channel, buffering at most one file's worth. Each full buffer is
//! written as a `urlset` file; when a source needs more than one file, a
//! per-source index is written too and returned first.
//!
//! File naming, with `.gz` appended when compression is on:
//!
//! | Case | Name |
//! |------|------|
//! | single file | `sitemap_{source}.xml` |
//! | split files | `sitemap_{source}_{n}.xml` (n starts at 1) |
//! | per-source index | `sitemap_index_{source}.xml` |
//! | global index | `{output_name}` with `.xml`/`.gz` normalised |

mod xml;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

pub use self::xml::{IndexEntry, LASTMOD_FORMAT, SITEMAP_NS, format_lastmod, render_index, render_urlset};
use crate::config::SitemapConfig;
use crate::types::SitemapEntry;
use crate::{Error, Result};

const INDEX_PREFIX: &str = "sitemap_index_";

/// Files written for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledSitemaps {
    /// Written paths, index first when present.
    pub files: Vec<PathBuf>,
    /// Entries written across all data files.
    pub url_count: u64,
}

/// Turns entry streams into sitemap files.
#[derive(Debug, Clone)]
pub struct SitemapAssembler {
    config: SitemapConfig,
}

impl SitemapAssembler {
    /// Create an assembler writing below `config.output_dir`.
    pub const fn new(config: SitemapConfig) -> Self {
        Self { config }
    }

    /// Settings in use.
    pub const fn config(&self) -> &SitemapConfig {
        &self.config
    }

    /// Create the output directory if needed.
    pub async fn prepare_output_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| {
                Error::Processing(format!(
                    "Cannot create output directory '{}': {e}",
                    self.config.output_dir.display()
                ))
            })
    }

    /// Consume every entry of `source` and write its files.
    ///
    /// A source with no entries yields no files. Entries keep their arrival
    /// order within and across files.
    #[instrument(skip(self, entries), fields(source = %source))]
    pub async fn assemble(
        &self,
        source: &str,
        mut entries: mpsc::Receiver<SitemapEntry>,
    ) -> Result<AssembledSitemaps> {
        let cap = self.config.max_urls_per_file.max(1);
        let mut buffer: Vec<SitemapEntry> = Vec::with_capacity(cap.min(4096));
        let mut assembled = AssembledSitemaps::default();
        let mut file_number = 1_usize;

        while let Some(entry) = entries.recv().await {
            // Flushing only when the next entry arrives tells us whether the
            // full buffer is the last file, which decides its name.
            if buffer.len() >= cap {
                let name = format!("sitemap_{source}_{file_number}.xml");
                let batch = std::mem::replace(&mut buffer, Vec::with_capacity(cap.min(4096)));
                assembled.url_count += batch.len() as u64;
                assembled.files.push(self.write_urlset(name, batch).await?);
                file_number += 1;
            }
            buffer.push(entry);
        }

        if !buffer.is_empty() {
            let name = if file_number == 1 {
                format!("sitemap_{source}.xml")
            } else {
                format!("sitemap_{source}_{file_number}.xml")
            };
            assembled.url_count += buffer.len() as u64;
            assembled.files.push(self.write_urlset(name, buffer).await?);
        }

        if assembled.files.len() > 1 {
            let index_name = format!("{INDEX_PREFIX}{source}.xml");
            let index = self.write_index(index_name, &assembled.files).await?;
            info!(
                index = %display_name(&index),
                sitemaps = assembled.files.len(),
                "Sitemap index created"
            );
            assembled.files.insert(0, index);
        }

        info!(
            urls = assembled.url_count,
            files = assembled.files.len(),
            "Sitemap generation completed"
        );
        Ok(assembled)
    }

    /// Write one index over the data sitemaps of every source.
    ///
    /// Per-source index files in `files` are skipped since an index may only
    /// reference sitemaps.
    pub async fn write_global_index(&self, files: &[PathBuf]) -> Result<PathBuf> {
        let data_files: Vec<PathBuf> = files
            .iter()
            .filter(|path| !is_index_file(path))
            .cloned()
            .collect();
        let name = self.global_index_name();
        let path = self.write_index(name, &data_files).await?;
        info!(
            index = %display_name(&path),
            sitemaps = data_files.len(),
            "Global sitemap index created"
        );
        Ok(path)
    }

    /// File name of the global index, before compression suffix.
    pub fn global_index_name(&self) -> String {
        let name = self.config.output_name.trim();
        let name = name.strip_suffix(".gz").unwrap_or(name);
        let name = name.strip_suffix(".xml").unwrap_or(name);
        format!("{name}.xml")
    }

    async fn write_urlset(&self, name: String, entries: Vec<SitemapEntry>) -> Result<PathBuf> {
        let path = self.config.output_dir.join(name);
        let compress = self.config.compress;
        let count = entries.len();
        let written = run_blocking(move || {
            let bytes = render_urlset(&entries)?;
            write_artifact(&path, &bytes, compress)
        })
        .await?;
        debug!(file = %display_name(&written), entries = count, "Sitemap file written");
        Ok(written)
    }

    async fn write_index(&self, name: String, files: &[PathBuf]) -> Result<PathBuf> {
        let now = Utc::now();
        let entries: Vec<IndexEntry> = files
            .iter()
            .map(|file| IndexEntry {
                loc: self.location_of(file),
                lastmod: now,
            })
            .collect();
        let path = self.config.output_dir.join(name);
        let compress = self.config.compress;
        run_blocking(move || {
            let bytes = render_index(&entries)?;
            write_artifact(&path, &bytes, compress)
        })
        .await
    }

    fn location_of(&self, file: &Path) -> String {
        let name = display_name(file);
        let base = self.config.base_url.trim_end_matches('/');
        if base.is_empty() {
            name
        } else {
            format!("{base}/{name}")
        }
    }
}

/// Whether `path` is a per-source index written by [`SitemapAssembler`].
pub fn is_index_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(INDEX_PREFIX))
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| Error::Processing(format!("sitemap writer task failed: {e}")))?
}

/// Write `bytes` to `path`, or gzip them to `path.gz` and leave no plain copy.
fn write_artifact(path: &Path, bytes: &[u8], compress: bool) -> Result<PathBuf> {
    let target = if compress {
        let mut name = path.as_os_str().to_owned();
        name.push(".gz");
        PathBuf::from(name)
    } else {
        path.to_path_buf()
    };

    let write = || -> std::io::Result<()> {
        let file = BufWriter::new(File::create(&target)?);
        if compress {
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(bytes)?;
            encoder.finish()?.flush()?;
        } else {
            let mut file = file;
            file.write_all(bytes)?;
            file.flush()?;
        }
        Ok(())
    };
    write().map_err(|e| {
        Error::Processing(format!("Failed to write '{}': {e}", target.display()))
    })?;

    if compress && path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(target)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}
