use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use crate::scanner::SourceImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivativeKind {
    Thumbnail,
    Display,
}

impl DerivativeKind {
    pub fn tag(&self) -> &'static str {
        match self {
            DerivativeKind::Thumbnail => "thumb",
            DerivativeKind::Display => "display",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    WebP,
    Jpeg,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::WebP => "webp",
            OutputFormat::Jpeg => "jpg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::WebP => "image/webp",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }
}

/// Content address for one derivative: a digest over the source identity
/// (resolved path, mtime, size) and the generation parameters (kind, size
/// parameter, output format). Digest collisions are accepted as cache hits.
#[derive(Debug, Clone)]
pub struct DerivativeKey {
    digest: String,
    kind: DerivativeKind,
    format: OutputFormat,
}

impl DerivativeKey {
    pub fn new(
        source: &SourceImage,
        kind: DerivativeKind,
        edge: u32,
        format: OutputFormat,
    ) -> Self {
        let mtime_nanos = source
            .modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        let mut hasher = Sha256::new();
        hasher.update(source.path.to_string_lossy().as_bytes());
        hasher.update(mtime_nanos.to_le_bytes());
        hasher.update(source.size.to_le_bytes());
        hasher.update(kind.tag().as_bytes());
        hasher.update(edge.to_le_bytes());
        hasher.update(format.extension().as_bytes());

        Self {
            digest: format!("{:x}", hasher.finalize()),
            kind,
            format,
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Sharded artifact path relative to the per-kind cache root: the first
    /// two digest characters bound directory fan-out.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.digest[..2])
            .join(&self.digest[2..])
            .join(format!("{}.{}", self.kind.tag(), self.format.extension()))
    }
}
