use image::{DynamicImage, ImageDecoder, imageops::FilterType, metadata::Orientation};
use std::io::{BufReader, Cursor};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::DerivativeConfig;
use crate::cache_key::{DerivativeKey, DerivativeKind, OutputFormat};
use crate::error::CatalogError;
use crate::scanner::SourceImage;

/// Distinguishes temp files written by concurrent tasks in one process.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// On-disk, content-addressed cache of resized image variants. Artifacts are
/// immutable once published; a changed source hashes to a new key, so old
/// artifacts are simply orphaned (cleanup belongs to external housekeeping).
pub struct DerivativeCache {
    config: DerivativeConfig,
}

impl DerivativeCache {
    pub fn new(config: DerivativeConfig) -> Self {
        Self { config }
    }

    /// The format actually produced for a request. When the efficient codec
    /// is compiled out, WebP requests are substituted with JPEG rather than
    /// failing.
    pub fn effective_format(&self, requested: OutputFormat) -> OutputFormat {
        #[cfg(feature = "webp")]
        {
            requested
        }
        #[cfg(not(feature = "webp"))]
        {
            match requested {
                OutputFormat::WebP => OutputFormat::Jpeg,
                other => other,
            }
        }
    }

    /// Masonry thumbnail: longer edge scaled to exactly `edge`, aspect ratio
    /// preserved, no cropping. The edge must come from the configured set.
    pub async fn thumbnail(
        &self,
        source: &SourceImage,
        edge: u32,
        format: OutputFormat,
    ) -> Result<(PathBuf, &'static str), CatalogError> {
        if !self.config.thumbnail_edges.contains(&edge) {
            return Err(CatalogError::InvalidSize {
                requested: edge,
                allowed: self.config.thumbnail_edges.clone(),
            });
        }
        self.ensure(source, DerivativeKind::Thumbnail, edge, format)
            .await
    }

    /// Display variant: longer edge capped at `max_edge`. Sources already
    /// smaller are re-encoded at native size, never upscaled.
    pub async fn display(
        &self,
        source: &SourceImage,
        max_edge: u32,
        format: OutputFormat,
    ) -> Result<(PathBuf, &'static str), CatalogError> {
        self.ensure(source, DerivativeKind::Display, max_edge, format)
            .await
    }

    async fn ensure(
        &self,
        source: &SourceImage,
        kind: DerivativeKind,
        edge: u32,
        format: OutputFormat,
    ) -> Result<(PathBuf, &'static str), CatalogError> {
        let format = self.effective_format(format);
        let key = DerivativeKey::new(source, kind, edge, format);

        let root = match kind {
            DerivativeKind::Thumbnail => &self.config.thumbnail_cache_directory,
            DerivativeKind::Display => &self.config.display_cache_directory,
        };
        let artifact = root.join(key.relative_path());

        // Dominant fast path under serving load: the artifact already exists.
        if artifact.exists() {
            return Ok((artifact, format.mime_type()));
        }

        debug!(
            "Generating {} derivative for {:?} (edge {}, {})",
            kind.tag(),
            source.relative,
            edge,
            format.extension()
        );

        if let Some(parent) = artifact.parent() {
            // create_dir_all succeeds when a concurrent creator got there
            // first.
            tokio::fs::create_dir_all(parent).await?;
        }

        let source_path = source.path.clone();
        let jpeg_quality = self.config.jpeg_quality;
        let webp_quality = self.config.webp_quality;
        let encoded = tokio::task::spawn_blocking(move || {
            render(&source_path, kind, edge, format, jpeg_quality, webp_quality)
        })
        .await??;

        // Publish atomically so a concurrent reader never sees a truncated
        // artifact. Every writer gets its own temp file; concurrent
        // generators produce identical bytes, so whichever rename lands last
        // wins and a rename that loses to an already-published artifact is
        // still a success.
        let temp = artifact.with_extension(format!(
            "{}.tmp-{}-{}",
            format.extension(),
            std::process::id(),
            TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&temp, &encoded).await?;
        if let Err(e) = tokio::fs::rename(&temp, &artifact).await {
            if !artifact.exists() {
                return Err(e.into());
            }
            let _ = tokio::fs::remove_file(&temp).await;
        }

        Ok((artifact, format.mime_type()))
    }
}

/// Decode, orient, resize, and encode one derivative. Runs on the blocking
/// pool; everything here is CPU or synchronous I/O.
fn render(
    source_path: &std::path::Path,
    kind: DerivativeKind,
    edge: u32,
    format: OutputFormat,
    jpeg_quality: u8,
    webp_quality: f32,
) -> Result<Vec<u8>, CatalogError> {
    let file = std::fs::File::open(source_path)?;
    let reader = image::ImageReader::new(BufReader::new(file)).with_guessed_format()?;
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder
        .orientation()
        .unwrap_or(Orientation::NoTransforms);

    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);

    let resized = resize(img, kind, edge);
    encode(&resized, format, jpeg_quality, webp_quality)
}

fn resize(img: DynamicImage, kind: DerivativeKind, edge: u32) -> DynamicImage {
    let long_edge = img.width().max(img.height());
    let target = match kind {
        // Masonry contract: the longer edge becomes exactly the requested
        // edge, even for small sources.
        DerivativeKind::Thumbnail => edge,
        // Display clamps the scale factor to 1.0; small sources pass through.
        DerivativeKind::Display => edge.min(long_edge),
    };

    if target == long_edge {
        img
    } else {
        img.resize(target, target, FilterType::Lanczos3)
    }
}

fn encode(
    img: &DynamicImage,
    format: OutputFormat,
    jpeg_quality: u8,
    webp_quality: f32,
) -> Result<Vec<u8>, CatalogError> {
    match format {
        OutputFormat::Jpeg => encode_jpeg(img, jpeg_quality),
        #[cfg(feature = "webp")]
        OutputFormat::WebP => {
            let rgb = img.to_rgb8();
            let (width, height) = rgb.dimensions();
            let encoder = webp::Encoder::from_rgb(rgb.as_raw(), width, height);
            Ok(encoder.encode(webp_quality).to_vec())
        }
        // Substituted to JPEG by effective_format before we get here.
        #[cfg(not(feature = "webp"))]
        OutputFormat::WebP => {
            let _ = webp_quality;
            encode_jpeg(img, jpeg_quality)
        }
    }
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, CatalogError> {
    use image::ImageEncoder;

    // JPEG has no alpha channel; normalize to RGB first.
    let rgb = img.to_rgb8();
    let mut buffer = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder.write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::path::Path;
    use tempfile::TempDir;

    fn test_config(root: &Path) -> DerivativeConfig {
        DerivativeConfig {
            thumbnail_cache_directory: root.join("cache/thumbnails"),
            display_cache_directory: root.join("cache/display"),
            thumbnail_edges: vec![120, 240],
            display_max_edge: 600,
            jpeg_quality: 85,
            webp_quality: 85.0,
        }
    }

    fn make_source(dir: &Path, name: &str, width: u32, height: u32) -> SourceImage {
        let path = dir.join(name);
        let buffer = ImageBuffer::from_pixel(width, height, Rgb::<u8>([120, 160, 200]));
        buffer.save(&path).unwrap();

        let metadata = std::fs::metadata(&path).unwrap();
        SourceImage {
            path: path.clone(),
            relative: PathBuf::from(name),
            size: metadata.len(),
            modified: metadata.modified().unwrap(),
            file_id: None,
        }
    }

    #[tokio::test]
    async fn test_thumbnail_preserves_aspect_ratio() {
        let temp = TempDir::new().unwrap();
        let cache = DerivativeCache::new(test_config(temp.path()));
        let source = make_source(temp.path(), "wide.png", 800, 400);

        let (path, mime) = cache
            .thumbnail(&source, 240, OutputFormat::Jpeg)
            .await
            .unwrap();
        assert_eq!(mime, "image/jpeg");

        let thumb = image::open(&path).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (240, 120));
    }

    #[tokio::test]
    async fn test_display_caps_long_edge() {
        let temp = TempDir::new().unwrap();
        let cache = DerivativeCache::new(test_config(temp.path()));
        let source = make_source(temp.path(), "big.png", 1200, 900);

        let (path, _) = cache
            .display(&source, 600, OutputFormat::Jpeg)
            .await
            .unwrap();
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (600, 450));
    }

    #[tokio::test]
    async fn test_display_never_upscales() {
        let temp = TempDir::new().unwrap();
        let cache = DerivativeCache::new(test_config(temp.path()));
        let source = make_source(temp.path(), "small.png", 320, 200);

        let (path, _) = cache
            .display(&source, 600, OutputFormat::Jpeg)
            .await
            .unwrap();
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (320, 200));
    }

    #[tokio::test]
    async fn test_second_call_serves_cached_artifact() {
        let temp = TempDir::new().unwrap();
        let cache = DerivativeCache::new(test_config(temp.path()));
        let source = make_source(temp.path(), "photo.png", 640, 480);

        let (first, _) = cache
            .thumbnail(&source, 120, OutputFormat::Jpeg)
            .await
            .unwrap();
        let generated_at = std::fs::metadata(&first).unwrap().modified().unwrap();

        let (second, _) = cache
            .thumbnail(&source, 120, OutputFormat::Jpeg)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(
            std::fs::metadata(&second).unwrap().modified().unwrap(),
            generated_at,
            "second call must not regenerate the artifact"
        );
    }

    #[tokio::test]
    async fn test_invalid_thumbnail_size_rejected_before_any_write() {
        let temp = TempDir::new().unwrap();
        let config = test_config(temp.path());
        let thumbs_dir = config.thumbnail_cache_directory.clone();
        let cache = DerivativeCache::new(config);
        let source = make_source(temp.path(), "photo.png", 640, 480);

        let result = cache.thumbnail(&source, 999, OutputFormat::Jpeg).await;
        assert!(matches!(
            result,
            Err(CatalogError::InvalidSize { requested: 999, .. })
        ));
        assert!(
            !thumbs_dir.exists(),
            "rejected request must not touch the cache"
        );
    }

    #[tokio::test]
    async fn test_concurrent_misses_for_one_key_both_succeed() {
        let temp = TempDir::new().unwrap();
        let cache = DerivativeCache::new(test_config(temp.path()));

        for i in 0..50 {
            let source = make_source(temp.path(), &format!("race_{i}.png"), 64, 48);
            let (a, b) = tokio::join!(
                cache.thumbnail(&source, 120, OutputFormat::Jpeg),
                cache.thumbnail(&source, 120, OutputFormat::Jpeg)
            );
            let (path_a, _) = a.unwrap();
            let (path_b, _) = b.unwrap();
            assert_eq!(path_a, path_b);
            assert!(path_a.exists());
        }
    }

    #[tokio::test]
    async fn test_corrupt_source_fails_for_that_source_only() {
        let temp = TempDir::new().unwrap();
        let cache = DerivativeCache::new(test_config(temp.path()));

        let path = temp.path().join("corrupt.jpg");
        std::fs::write(&path, b"this is not an image").unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        let source = SourceImage {
            path: path.clone(),
            relative: PathBuf::from("corrupt.jpg"),
            size: metadata.len(),
            modified: metadata.modified().unwrap(),
            file_id: None,
        };

        let result = cache.thumbnail(&source, 120, OutputFormat::Jpeg).await;
        assert!(result.is_err());
    }

    #[cfg(feature = "webp")]
    #[tokio::test]
    async fn test_webp_artifact_and_mime() {
        let temp = TempDir::new().unwrap();
        let cache = DerivativeCache::new(test_config(temp.path()));
        let source = make_source(temp.path(), "photo.png", 640, 480);

        let (path, mime) = cache
            .thumbnail(&source, 120, OutputFormat::WebP)
            .await
            .unwrap();
        assert_eq!(mime, "image/webp");
        assert!(path.to_string_lossy().ends_with("thumb.webp"));
        assert!(path.exists());
    }

    #[test]
    fn test_resize_policies() {
        let img = DynamicImage::new_rgb8(1000, 500);

        let thumb = resize(img.clone(), DerivativeKind::Thumbnail, 200);
        assert_eq!((thumb.width(), thumb.height()), (200, 100));

        // Thumbnails scale small sources up to the masonry edge.
        let small = DynamicImage::new_rgb8(100, 50);
        let thumb = resize(small.clone(), DerivativeKind::Thumbnail, 200);
        assert_eq!((thumb.width(), thumb.height()), (200, 100));

        // Display clamps instead.
        let display = resize(small, DerivativeKind::Display, 200);
        assert_eq!((display.width(), display.height()), (100, 50));
    }
}
