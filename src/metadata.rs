use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex;
use tracing::debug;

/// Tags requested from the external extractor. The union of the string,
/// numeric, and timestamp whitelists consumed by the summarizer.
pub(crate) const REQUESTED_TAGS: &[&str] = &[
    "FileName",
    "Directory",
    "MIMEType",
    "Model",
    "Make",
    "LensModel",
    "Artist",
    "Creator",
    "Title",
    "Headline",
    "Description",
    "Subject",
    "Keywords",
    "Location",
    "City",
    "State",
    "Province-State",
    "Country",
    "ImageWidth",
    "ImageHeight",
    "Orientation",
    "FocalLength",
    "FNumber",
    "ShutterSpeedValue",
    "ExposureTime",
    "ISO",
    "GPSLatitude",
    "GPSLongitude",
    "CreateDate",
    "DateTimeOriginal",
];

/// Typed view over one file's raw extraction result. All fields are optional;
/// an extraction failure yields the default (fully absent) record.
#[derive(Debug, Clone, Default)]
pub struct MetadataRecord {
    pub file_name: Option<String>,
    pub directory: Option<String>,
    pub mime_type: Option<String>,
    pub model: Option<String>,
    pub make: Option<String>,
    pub lens_model: Option<String>,
    pub artist: Option<String>,
    pub creator: Option<String>,
    pub title: Option<String>,
    pub headline: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub province_state: Option<String>,
    pub country: Option<String>,
    /// Merged Subject and Keywords entries, in extraction order.
    pub keywords: Vec<String>,

    // Numeric fields keep the raw JSON value so a failed coercion can fall
    // back to whatever the extractor produced.
    pub image_width: Option<Value>,
    pub image_height: Option<Value>,
    pub orientation: Option<Value>,
    pub focal_length: Option<Value>,
    pub f_number: Option<Value>,
    pub shutter_speed_value: Option<Value>,
    pub exposure_time: Option<Value>,
    pub iso: Option<Value>,
    pub gps_latitude: Option<Value>,
    pub gps_longitude: Option<Value>,

    pub create_date: Option<String>,
    pub date_time_original: Option<String>,
}

impl MetadataRecord {
    /// Build a typed record from the raw exiftool object.
    pub fn from_raw(raw: &Map<String, Value>) -> Self {
        let string = |key: &str| -> Option<String> {
            raw.get(key).and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        };
        let value = |key: &str| raw.get(key).cloned();

        let mut keywords = Vec::new();
        for key in ["Subject", "Keywords"] {
            match raw.get(key) {
                Some(Value::String(s)) => keywords.push(s.clone()),
                Some(Value::Array(items)) => {
                    keywords.extend(items.iter().filter_map(|v| v.as_str().map(String::from)));
                }
                _ => {}
            }
        }

        Self {
            file_name: string("FileName"),
            directory: string("Directory"),
            mime_type: string("MIMEType"),
            model: string("Model"),
            make: string("Make"),
            lens_model: string("LensModel"),
            artist: string("Artist"),
            creator: string("Creator"),
            title: string("Title"),
            headline: string("Headline"),
            description: string("Description"),
            location: string("Location"),
            city: string("City"),
            state: string("State"),
            province_state: string("Province-State"),
            country: string("Country"),
            keywords,
            image_width: value("ImageWidth"),
            image_height: value("ImageHeight"),
            orientation: value("Orientation"),
            focal_length: value("FocalLength"),
            f_number: value("FNumber"),
            shutter_speed_value: value("ShutterSpeedValue"),
            exposure_time: value("ExposureTime"),
            iso: value("ISO"),
            gps_latitude: value("GPSLatitude"),
            gps_longitude: value("GPSLongitude"),
            create_date: string("CreateDate"),
            date_time_original: string("DateTimeOriginal"),
        }
    }
}

struct MetaCacheEntry {
    record: MetadataRecord,
    /// Modification time observed when the entry was written.
    mtime: SystemTime,
    captured_at: Instant,
}

/// In-memory metadata cache keyed by resolved absolute path. Entries are
/// validated on every lookup (existence, mtime match, TTL) and evicted
/// lazily the moment any check fails.
pub struct MetaCache {
    ttl: Duration,
    entries: Mutex<HashMap<PathBuf, MetaCacheEntry>>,
}

impl MetaCache {
    /// A ttl of zero disables expiry by time; the mtime check still applies.
    pub fn new(ttl_secs: u64) -> Self {
        Self::with_ttl(Duration::from_secs(ttl_secs))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, path: &Path) -> Option<MetadataRecord> {
        let resolved = resolve(path);
        let mut entries = self.entries.lock().await;

        if !entries.contains_key(&resolved) {
            return None;
        }

        let mtime = match std::fs::metadata(&resolved).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(_) => {
                entries.remove(&resolved);
                debug!("Evicted vanished file from metadata cache: {:?}", resolved);
                return None;
            }
        };

        let entry = entries.get(&resolved)?;
        if mtime != entry.mtime {
            entries.remove(&resolved);
            debug!("Evicted stale metadata cache entry: {:?}", resolved);
            return None;
        }
        if !self.ttl.is_zero() && entry.captured_at.elapsed() > self.ttl {
            entries.remove(&resolved);
            debug!("Evicted expired metadata cache entry: {:?}", resolved);
            return None;
        }

        Some(entry.record.clone())
    }

    /// Store a record. The file is re-stated at write time; if it vanished
    /// between extraction and this call the write is dropped silently.
    pub async fn set(&self, path: &Path, record: MetadataRecord) {
        let resolved = resolve(path);
        let mtime = match std::fs::metadata(&resolved).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(_) => return,
        };

        let mut entries = self.entries.lock().await;
        entries.insert(
            resolved,
            MetaCacheEntry {
                record,
                mtime,
                captured_at: Instant::now(),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

fn resolve(path: &Path) -> PathBuf {
    // Canonicalization fails once the file is gone; falling back to the
    // caller's path keeps eviction of vanished entries reachable.
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record_with_title(title: &str) -> MetadataRecord {
        MetadataRecord {
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_get_set_roundtrip() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("img.jpg");
        std::fs::write(&file, b"data").unwrap();

        let cache = MetaCache::new(0);
        assert!(cache.get(&file).await.is_none());

        cache.set(&file, record_with_title("sunset")).await;
        let record = cache.get(&file).await.expect("entry should be valid");
        assert_eq!(record.title.as_deref(), Some("sunset"));
    }

    #[tokio::test]
    async fn test_mtime_change_evicts() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("img.jpg");
        std::fs::write(&file, b"data").unwrap();

        let cache = MetaCache::new(0);
        cache.set(&file, record_with_title("before")).await;

        // Push the mtime forward, as a rewrite of the file would.
        let handle = std::fs::File::options().write(true).open(&file).unwrap();
        handle
            .set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();

        assert!(cache.get(&file).await.is_none());
        assert_eq!(cache.len().await, 0, "stale entry should be evicted");
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("img.jpg");
        std::fs::write(&file, b"data").unwrap();

        let cache = MetaCache::with_ttl(Duration::from_millis(40));
        cache.set(&file, record_with_title("ephemeral")).await;
        assert!(cache.get(&file).await.is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get(&file).await.is_none());
    }

    #[tokio::test]
    async fn test_ttl_zero_never_expires_by_time() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("img.jpg");
        std::fs::write(&file, b"data").unwrap();

        let cache = MetaCache::new(0);
        cache.set(&file, record_with_title("stable")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get(&file).await.is_some());
    }

    #[tokio::test]
    async fn test_vanished_file_evicts_and_set_is_dropped() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("img.jpg");
        std::fs::write(&file, b"data").unwrap();

        let cache = MetaCache::new(0);
        cache.set(&file, record_with_title("doomed")).await;
        std::fs::remove_file(&file).unwrap();
        assert!(cache.get(&file).await.is_none());
        assert_eq!(cache.len().await, 0);

        // Writing for a missing file is silently dropped.
        cache.set(&file, record_with_title("ghost")).await;
        assert_eq!(cache.len().await, 0);
    }

    #[test]
    fn test_record_from_raw() {
        let raw: Map<String, Value> = serde_json::from_str(
            r#"{
                "FileName": "img.jpg",
                "Title": "Dawn",
                "ImageWidth": 4000,
                "ImageHeight": "3000",
                "Keywords": ["season:winter", "snow"],
                "Subject": "mountains",
                "ISO": 200,
                "CreateDate": "2024:01:15 08:30:00"
            }"#,
        )
        .unwrap();

        let record = MetadataRecord::from_raw(&raw);
        assert_eq!(record.file_name.as_deref(), Some("img.jpg"));
        assert_eq!(record.title.as_deref(), Some("Dawn"));
        assert_eq!(record.image_width, Some(Value::from(4000)));
        assert_eq!(record.image_height, Some(Value::from("3000")));
        assert_eq!(
            record.keywords,
            vec!["mountains", "season:winter", "snow"]
        );
        assert_eq!(record.create_date.as_deref(), Some("2024:01:15 08:30:00"));
    }
}
