use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::PrebuildConfig;
use crate::cache_key::OutputFormat;
use crate::derivative::DerivativeCache;
use crate::scanner::SourceImage;

#[derive(Debug, Default, Clone, Copy)]
pub struct PrebuildReport {
    /// Artifacts written to the derivative cache (hits count too; the cache
    /// simply returns them without regeneration).
    pub generated: usize,
    /// Sources skipped because their longest edge was below the minimum.
    pub skipped: usize,
    /// Variant generations that failed (corrupt sources, codec errors).
    pub failed: usize,
}

/// Populate the derivative cache for the whole inventory ahead of
/// interactive serving. Per-source failures are logged and counted, never
/// fatal to the pass.
pub async fn run(
    cache: Arc<DerivativeCache>,
    config: &PrebuildConfig,
    sources: Vec<SourceImage>,
    thumbnail_edges: Vec<u32>,
    display_edge: u32,
    include_efficient_format: bool,
) -> PrebuildReport {
    let total = sources.len();
    info!(
        "Prebuilding derivatives for {} sources ({} thumbnail sizes, display {}, webp: {})",
        total,
        thumbnail_edges.len(),
        display_edge,
        include_efficient_format
    );

    // The permit pool caps concurrent decodes independent of inventory size.
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut tasks: JoinSet<(usize, usize, usize)> = JoinSet::new();

    for source in sources {
        let cache = cache.clone();
        let semaphore = semaphore.clone();
        let edges = thumbnail_edges.clone();
        let min_edge = config.min_source_edge;

        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (0, 0, 0),
            };

            let probe_path = source.path.clone();
            let dimensions =
                tokio::task::spawn_blocking(move || image::image_dimensions(&probe_path)).await;
            let (width, height) = match dimensions {
                Ok(Ok(dims)) => dims,
                Ok(Err(e)) => {
                    warn!("Prebuild cannot read {:?}: {}", source.relative, e);
                    return (0, 0, 1);
                }
                Err(e) => {
                    warn!("Prebuild probe task failed for {:?}: {}", source.relative, e);
                    return (0, 0, 1);
                }
            };

            if width.max(height) < min_edge {
                debug!(
                    "Skipping low-resolution source {:?} ({}x{})",
                    source.relative, width, height
                );
                return (0, 1, 0);
            }

            let mut formats = vec![OutputFormat::Jpeg];
            if include_efficient_format {
                formats.push(OutputFormat::WebP);
            }

            let mut generated = 0;
            let mut failed = 0;
            for format in formats {
                for &edge in &edges {
                    match cache.thumbnail(&source, edge, format).await {
                        Ok(_) => generated += 1,
                        Err(e) => {
                            warn!(
                                "Prebuild thumbnail {}px failed for {:?}: {}",
                                edge, source.relative, e
                            );
                            failed += 1;
                        }
                    }
                }
                match cache.display(&source, display_edge, format).await {
                    Ok(_) => generated += 1,
                    Err(e) => {
                        warn!(
                            "Prebuild display failed for {:?}: {}",
                            source.relative, e
                        );
                        failed += 1;
                    }
                }
            }

            (generated, 0, failed)
        });
    }

    let mut report = PrebuildReport::default();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok((generated, skipped, failed)) => {
                report.generated += generated;
                report.skipped += skipped;
                report.failed += failed;
            }
            Err(e) => {
                warn!("Prebuild worker panicked: {}", e);
                report.failed += 1;
            }
        }
    }

    info!(
        "Prebuild complete: {} artifacts generated, {} sources skipped, {} failures",
        report.generated, report.skipped, report.failed
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DerivativeConfig;
    use image::{ImageBuffer, Rgb};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn test_cache(root: &Path) -> Arc<DerivativeCache> {
        Arc::new(DerivativeCache::new(DerivativeConfig {
            thumbnail_cache_directory: root.join("cache/thumbnails"),
            display_cache_directory: root.join("cache/display"),
            thumbnail_edges: vec![120, 240],
            display_max_edge: 600,
            jpeg_quality: 85,
            webp_quality: 85.0,
        }))
    }

    fn make_source(dir: &Path, name: &str, width: u32, height: u32) -> SourceImage {
        let path = dir.join(name);
        let buffer = ImageBuffer::from_pixel(width, height, Rgb::<u8>([64, 64, 64]));
        buffer.save(&path).unwrap();
        source_for(&path, name)
    }

    fn source_for(path: &Path, name: &str) -> SourceImage {
        let metadata = std::fs::metadata(path).unwrap();
        SourceImage {
            path: path.to_path_buf(),
            relative: PathBuf::from(name),
            size: metadata.len(),
            modified: metadata.modified().unwrap(),
            file_id: None,
        }
    }

    fn test_config() -> PrebuildConfig {
        PrebuildConfig {
            min_source_edge: 200,
            concurrency: 2,
        }
    }

    #[tokio::test]
    async fn test_prebuild_generates_every_combination() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(temp.path());
        let sources = vec![
            make_source(temp.path(), "a.png", 640, 480),
            make_source(temp.path(), "b.png", 480, 640),
        ];

        let report = run(cache, &test_config(), sources, vec![120, 240], 600, false).await;
        // Two sources x (two thumbnails + one display).
        assert_eq!(report.generated, 6);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_prebuild_skips_low_resolution_sources() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(temp.path());
        let sources = vec![
            make_source(temp.path(), "big.png", 640, 480),
            make_source(temp.path(), "tiny.png", 100, 80),
        ];

        let report = run(cache, &test_config(), sources, vec![120], 600, false).await;
        assert_eq!(report.generated, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_prebuild_survives_corrupt_sources() {
        let temp = TempDir::new().unwrap();
        let cache = test_cache(temp.path());

        let corrupt_path = temp.path().join("corrupt.jpg");
        std::fs::write(&corrupt_path, b"garbage").unwrap();
        let sources = vec![
            make_source(temp.path(), "good.png", 640, 480),
            source_for(&corrupt_path, "corrupt.jpg"),
        ];

        let report = run(cache, &test_config(), sources, vec![120], 600, false).await;
        assert_eq!(report.generated, 2, "the healthy source still completes");
        assert_eq!(report.failed, 1);
    }
}
