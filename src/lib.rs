use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod cache_key;
pub mod catalog;
pub mod derivative;
pub mod error;
pub mod extractor;
pub mod metadata;
pub mod prebuild;
pub mod scanner;
pub mod summary;

pub use catalog::Catalog;
pub use error::CatalogError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub app: AppConfig,
    pub catalog: CatalogConfig,
    pub metadata: MetadataConfig,
    pub derivatives: DerivativeConfig,
    pub prebuild: PrebuildConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub name: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    pub source_directory: PathBuf,
    /// Directory names pruned before descent (exact, case-insensitive).
    pub ignore_directories: Vec<String>,
    /// Glob-style patterns matched against file base names (case-insensitive).
    pub ignore_globs: Vec<String>,
    /// Recognized image extensions, without the leading dot.
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetadataConfig {
    /// Metadata cache entry time-to-live in seconds. 0 disables time expiry.
    pub cache_ttl_secs: u64,
    /// Timeout for a single exiftool invocation.
    pub extractor_timeout_secs: u64,
    /// Executable name or path for the external extractor.
    pub exiftool_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DerivativeConfig {
    pub thumbnail_cache_directory: PathBuf,
    pub display_cache_directory: PathBuf,
    /// Allowed thumbnail edge lengths. Requests outside this set are rejected.
    pub thumbnail_edges: Vec<u32>,
    /// Default long-side cap for display derivatives.
    pub display_max_edge: u32,
    pub jpeg_quality: u8,
    pub webp_quality: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrebuildConfig {
    /// Sources whose longest edge is below this are skipped.
    pub min_source_edge: u32,
    /// Worker pool ceiling, independent of inventory size.
    pub concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppConfig {
                name: "Shashinkan".to_string(),
                log_level: "info".to_string(),
            },
            catalog: CatalogConfig {
                source_directory: PathBuf::from("photos"),
                ignore_directories: vec![
                    ".cache".to_string(),
                    ".thumbnails".to_string(),
                    "cache".to_string(),
                    "@eaDir".to_string(),
                ],
                ignore_globs: vec![
                    "thumb*".to_string(),
                    "*_preview.*".to_string(),
                    ".*".to_string(),
                ],
                extensions: vec![
                    "jpg".to_string(),
                    "jpeg".to_string(),
                    "png".to_string(),
                    "tif".to_string(),
                    "tiff".to_string(),
                    "heic".to_string(),
                    "heif".to_string(),
                    "webp".to_string(),
                ],
            },
            metadata: MetadataConfig {
                cache_ttl_secs: 300,
                extractor_timeout_secs: 20,
                exiftool_path: "exiftool".to_string(),
            },
            derivatives: DerivativeConfig {
                thumbnail_cache_directory: PathBuf::from("cache/thumbnails"),
                display_cache_directory: PathBuf::from("cache/display"),
                thumbnail_edges: vec![240, 320, 480],
                display_max_edge: 1600,
                jpeg_quality: 85,
                webp_quality: 85.0,
            },
            prebuild: PrebuildConfig {
                min_source_edge: 512,
                concurrency: 4,
            },
        }
    }
}
