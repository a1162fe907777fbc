use std::collections::HashMap;
use std::path::{Component, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::Config;
use crate::cache_key::OutputFormat;
use crate::derivative::DerivativeCache;
use crate::error::CatalogError;
use crate::extractor::MetadataExtractor;
use crate::metadata::{MetaCache, MetadataRecord};
use crate::prebuild::{self, PrebuildReport};
use crate::scanner::{Scanner, SourceImage};
use crate::summary::{self, Facets, Summary};

/// The facade the serving layer talks to: scanning, memoized metadata
/// summaries, facet aggregation, and the derivative caches. Constructed once
/// per process and shared by handle; owns all mutable cache state.
pub struct Catalog {
    config: Config,
    root: PathBuf,
    scanner: Arc<Scanner>,
    extractor: MetadataExtractor,
    meta_cache: MetaCache,
    derivatives: Arc<DerivativeCache>,
}

impl Catalog {
    pub fn new(config: Config) -> Self {
        let root = config
            .catalog
            .source_directory
            .canonicalize()
            .unwrap_or_else(|_| config.catalog.source_directory.clone());

        Self {
            scanner: Arc::new(Scanner::new(config.catalog.clone())),
            extractor: MetadataExtractor::new(config.metadata.clone()),
            meta_cache: MetaCache::new(config.metadata.cache_ttl_secs),
            derivatives: Arc::new(DerivativeCache::new(config.derivatives.clone())),
            root,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fresh ordered, deduplicated inventory of the source tree.
    pub async fn scan(&self) -> Result<Vec<SourceImage>, CatalogError> {
        let scanner = self.scanner.clone();
        Ok(tokio::task::spawn_blocking(move || scanner.scan()).await?)
    }

    /// Memoized metadata summary for one source. Extraction failures degrade
    /// to an empty record; this never errors.
    pub async fn summary_for(&self, source: &SourceImage) -> Summary {
        let record = match self.meta_cache.get(&source.path).await {
            Some(record) => record,
            None => {
                let record = match self.extractor.extract_one(&source.path).await {
                    Ok(raw) => MetadataRecord::from_raw(&raw),
                    Err(e) => {
                        warn!("Metadata extraction failed for {:?}: {}", source.relative, e);
                        MetadataRecord::default()
                    }
                };
                self.meta_cache.set(&source.path, record.clone()).await;
                record
            }
        };

        self.finish_summary(source, &record)
    }

    /// Summaries for a whole inventory. Cache misses are extracted in one
    /// batched invocation of the external tool.
    pub async fn summaries(&self, sources: &[SourceImage]) -> Vec<Summary> {
        let mut cached: HashMap<PathBuf, MetadataRecord> = HashMap::new();
        let mut misses: Vec<PathBuf> = Vec::new();

        for source in sources {
            match self.meta_cache.get(&source.path).await {
                Some(record) => {
                    cached.insert(source.path.clone(), record);
                }
                None => misses.push(source.path.clone()),
            }
        }

        if !misses.is_empty() {
            let mut extracted = match self.extractor.extract_batch(&misses).await {
                Ok(extracted) => extracted,
                Err(e) => {
                    warn!("Batch metadata extraction failed: {}", e);
                    HashMap::new()
                }
            };

            for path in misses {
                let record = extracted
                    .remove(&path)
                    .map(|raw| MetadataRecord::from_raw(&raw))
                    .unwrap_or_default();
                self.meta_cache.set(&path, record.clone()).await;
                cached.insert(path, record);
            }
        }

        sources
            .iter()
            .map(|source| {
                let record = cached.get(&source.path).cloned().unwrap_or_default();
                self.finish_summary(source, &record)
            })
            .collect()
    }

    fn finish_summary(&self, source: &SourceImage, record: &MetadataRecord) -> Summary {
        let mut summary = summary::summarize(record);
        summary.name = source
            .relative
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        summary.path = source.relative.to_string_lossy().to_string();
        summary
    }

    /// Sorted, duplicate-free facet values over a set of summaries.
    pub fn facets(&self, summaries: &[Summary]) -> Facets {
        summary::facets(summaries)
    }

    pub async fn thumbnail(
        &self,
        source: &SourceImage,
        edge: u32,
        format: OutputFormat,
    ) -> Result<(PathBuf, &'static str), CatalogError> {
        self.derivatives.thumbnail(source, edge, format).await
    }

    pub async fn display(
        &self,
        source: &SourceImage,
        max_edge: u32,
        format: OutputFormat,
    ) -> Result<(PathBuf, &'static str), CatalogError> {
        self.derivatives.display(source, max_edge, format).await
    }

    /// Populate the derivative cache for the given inventory. Returns the
    /// number of artifacts generated; per-source failures are logged inside.
    pub async fn prebuild(
        &self,
        sources: Vec<SourceImage>,
        thumbnail_edges: Vec<u32>,
        display_edge: u32,
        include_efficient_format: bool,
    ) -> PrebuildReport {
        prebuild::run(
            self.derivatives.clone(),
            &self.config.prebuild,
            sources,
            thumbnail_edges,
            display_edge,
            include_efficient_format,
        )
        .await
    }

    /// Resolve a caller-supplied relative path to a source inside the root.
    /// Anything escaping the root is rejected before touching the
    /// filesystem; a path inside the root that does not exist is `NotFound`.
    pub fn resolve_source(&self, relative: &str) -> Result<SourceImage, CatalogError> {
        let rel = PathBuf::from(relative);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(CatalogError::InvalidPath);
        }

        let resolved = self
            .root
            .join(&rel)
            .canonicalize()
            .map_err(|_| CatalogError::NotFound)?;
        if !resolved.starts_with(&self.root) {
            // A symlink inside the tree pointed outside it.
            return Err(CatalogError::InvalidPath);
        }

        let metadata = std::fs::metadata(&resolved)?;
        if !metadata.is_file() {
            return Err(CatalogError::NotFound);
        }

        let relative = resolved
            .strip_prefix(&self.root)
            .map(|p| p.to_path_buf())
            .unwrap_or(rel);

        Ok(SourceImage {
            file_id: crate::scanner::file_identity(&metadata),
            size: metadata.len(),
            modified: metadata.modified()?,
            path: resolved,
            relative,
        })
    }

    /// Content type for serving a source file as-is.
    pub fn source_mime(&self, source: &SourceImage) -> String {
        mime_guess::from_path(&source.path)
            .first_or_octet_stream()
            .to_string()
    }

    /// Number of live metadata cache entries, for diagnostics.
    pub async fn metadata_cache_len(&self) -> usize {
        self.meta_cache.len().await
    }
}
