use serde::Serialize;
use serde_json::Value;

use crate::metadata::MetadataRecord;

/// Compact, query-friendly projection of one file's metadata. A pure
/// function of the record plus the static lookup tables below.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    /// File base name, filled in by the catalog.
    pub name: String,
    /// Path relative to the catalog root, filled in by the catalog.
    pub path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lens_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub keywords: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_width: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_height: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal_length: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f_number: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutter_speed_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_time: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_latitude: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_longitude: Option<Value>,
    /// Raw EXIF orientation tag, distinct from the derived `orientation`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exif_orientation: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time_original: Option<String>,

    /// `portrait`, `landscape`, or `square`; absent when either dimension
    /// is unknown or zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<String>,
    /// Region name normalized via the state table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Parsed from a `season:<value>` keyword; `fall` canonicalizes to
    /// `autumn`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<String>,
}

/// Distinct filterable values aggregated across the catalog.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Facets {
    pub regions: Vec<String>,
    pub seasons: Vec<String>,
}

pub fn summarize(record: &MetadataRecord) -> Summary {
    let clean = |v: &Option<String>| v.as_deref().map(clean_string);

    let image_width = record.image_width.as_ref().map(coerce_numeric);
    let image_height = record.image_height.as_ref().map(coerce_numeric);
    let orientation = derive_orientation(image_width.as_ref(), image_height.as_ref());

    let region = record
        .state
        .as_deref()
        .or(record.province_state.as_deref())
        .map(clean_string)
        .filter(|s| !s.is_empty())
        .map(|s| normalize_region(&s));

    let season = derive_season(&record.keywords);

    Summary {
        name: String::new(),
        path: String::new(),
        mime_type: clean(&record.mime_type),
        make: clean(&record.make),
        model: clean(&record.model),
        lens_model: clean(&record.lens_model),
        artist: clean(&record.artist),
        creator: clean(&record.creator),
        title: clean(&record.title),
        headline: clean(&record.headline),
        description: clean(&record.description),
        location: clean(&record.location),
        city: clean(&record.city),
        state: clean(&record.state),
        country: clean(&record.country),
        keywords: record.keywords.iter().map(|k| clean_string(k)).collect(),
        image_width,
        image_height,
        focal_length: record.focal_length.as_ref().map(coerce_numeric),
        f_number: record.f_number.as_ref().map(coerce_numeric),
        shutter_speed_value: record.shutter_speed_value.as_ref().map(coerce_numeric),
        exposure_time: record.exposure_time.as_ref().map(coerce_numeric),
        iso: record.iso.as_ref().map(coerce_numeric),
        gps_latitude: record.gps_latitude.as_ref().map(coerce_numeric),
        gps_longitude: record.gps_longitude.as_ref().map(coerce_numeric),
        exif_orientation: record.orientation.as_ref().map(coerce_numeric),
        create_date: record.create_date.clone().filter(|s| !s.is_empty()),
        date_time_original: record.date_time_original.clone().filter(|s| !s.is_empty()),
        orientation,
        region,
        season,
    }
}

/// Aggregate sorted, duplicate-free facet values over a set of summaries.
pub fn facets(summaries: &[Summary]) -> Facets {
    use std::collections::BTreeSet;

    let regions: BTreeSet<String> = summaries.iter().filter_map(|s| s.region.clone()).collect();
    let seasons: BTreeSet<String> = summaries.iter().filter_map(|s| s.season.clone()).collect();

    Facets {
        regions: regions.into_iter().collect(),
        seasons: seasons.into_iter().collect(),
    }
}

impl Summary {
    /// Case-insensitive substring search over the text fields, matching the
    /// haystack the original gallery API searched.
    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }

        let mut hay = String::new();
        for field in [
            Some(&self.name),
            self.title.as_ref(),
            self.headline.as_ref(),
            self.description.as_ref(),
            self.city.as_ref(),
            self.state.as_ref(),
            self.country.as_ref(),
            self.location.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            hay.push_str(field);
            hay.push(' ');
        }
        for keyword in &self.keywords {
            hay.push_str(keyword);
            hay.push(' ');
        }

        hay.to_lowercase().contains(&query)
    }

    pub fn matches_orientation(&self, orientation: &str) -> bool {
        orientation.is_empty()
            || self
                .orientation
                .as_deref()
                .is_some_and(|o| o.eq_ignore_ascii_case(orientation))
    }
}

/// Replace the control characters exiftool can leak into strings (everything
/// below 0x20 except tab and newline) with spaces and trim the result.
fn clean_string(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\r' | '\u{00}'..='\u{08}' | '\u{0b}' | '\u{0c}' | '\u{0e}'..='\u{1f}' => ' ',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Best-effort numeric coercion: numbers pass through, numeric strings are
/// parsed, everything else retains the original value.
fn coerce_numeric(value: &Value) -> Value {
    match value {
        Value::Number(_) => value.clone(),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or_else(|| value.clone()),
            Err(_) => value.clone(),
        },
        _ => value.clone(),
    }
}

fn as_positive_f64(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|f| *f > 0.0)
}

fn derive_orientation(width: Option<&Value>, height: Option<&Value>) -> Option<String> {
    let w = as_positive_f64(width)?;
    let h = as_positive_f64(height)?;
    let orientation = if h > w {
        "portrait"
    } else if w > h {
        "landscape"
    } else {
        "square"
    };
    Some(orientation.to_string())
}

fn derive_season(keywords: &[String]) -> Option<String> {
    for keyword in keywords {
        if let Some(value) = keyword.trim().to_lowercase().strip_prefix("season:") {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            // Canonicalize the American name.
            let season = if value == "fall" { "autumn" } else { value };
            return Some(season.to_string());
        }
    }
    None
}

/// Expand two-letter state codes to full names; pass full names through
/// title-cased; leave unknown codes untouched.
fn normalize_region(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        let code = trimmed.to_ascii_uppercase();
        return match STATE_NAMES.iter().find(|(abbr, _)| *abbr == code) {
            Some((_, name)) => (*name).to_string(),
            // Unrecognized codes pass through unexpanded.
            None => trimmed.to_string(),
        };
    }
    title_case(trimmed)
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

const STATE_NAMES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("DC", "District of Columbia"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
];
