use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// The API is inconsistent about quoting numbers, so ids, counts and
/// timestamps are accepted as either JSON strings or numbers.
pub(crate) fn lenient_string<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_string(&Value::deserialize(d)?))
}

pub(crate) fn lenient_u64<'de, D>(d: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_u64(&Value::deserialize(d)?).unwrap_or(0))
}

pub(crate) fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn value_to_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `{"_content": "..."}` wrapper used for most text fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Content {
    #[serde(rename = "_content", default, deserialize_with = "lenient_string")]
    pub content: String,
}

/// One photo as returned by the list calls, with whichever extras were
/// requested. Absent extras default to empty.
#[derive(Debug, Clone, Deserialize)]
pub struct Photo {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default)]
    pub url_o: Option<String>,
    #[serde(default)]
    pub originalformat: Option<String>,
    #[serde(default)]
    pub media: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub views: u64,
    #[serde(default)]
    pub datetaken: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub dateupload: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tags: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub machine_tags: String,
    #[serde(default)]
    pub description: Option<Content>,
}

/// One album (photoset) from `flickr.photosets.getList`.
#[derive(Debug, Clone, Deserialize)]
pub struct Album {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default)]
    pub title: Content,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub photos: u64,
}

/// Full `flickr.photos.getInfo` payload. Kept as raw JSON so the sidecar
/// preserves every field; accessors pull out what the tool itself uses.
/// `Default` is the empty payload used when detail is skipped or
/// unavailable.
#[derive(Debug, Clone, Default)]
pub struct PhotoDetails(pub Value);

impl PhotoDetails {
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    fn text(&self, pointer: &str) -> String {
        self.0.pointer(pointer).map(value_to_string).unwrap_or_default()
    }

    fn flag(&self, pointer: &str) -> bool {
        self.0
            .pointer(pointer)
            .and_then(value_to_u64)
            .map(|v| v != 0)
            .unwrap_or(false)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    pub fn title(&self) -> String {
        self.text("/title/_content")
    }

    pub fn description(&self) -> String {
        self.text("/description/_content")
    }

    /// `YYYY-MM-DD HH:MM:SS` as reported by the service, if any.
    pub fn date_taken(&self) -> Option<String> {
        Some(self.text("/dates/taken")).filter(|s| !s.is_empty())
    }

    pub fn date_uploaded(&self) -> Option<i64> {
        let s = self.text("/dateuploaded");
        s.parse().ok()
    }

    pub fn original_format(&self) -> Option<String> {
        Some(self.text("/originalformat")).filter(|s| !s.is_empty())
    }

    pub fn tags(&self) -> Vec<String> {
        self.0
            .pointer("/tags/tag")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.get("_content").map(value_to_string))
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn comments(&self) -> String {
        self.text("/comments/_content")
    }

    /// Visibility collapsed to one label: public, friends+family, friends,
    /// family, private, or unknown when the block is missing.
    pub fn privacy(&self) -> &'static str {
        if self.0.get("visibility").is_none() {
            return "unknown";
        }
        let public = self.flag("/visibility/ispublic");
        let friend = self.flag("/visibility/isfriend");
        let family = self.flag("/visibility/isfamily");
        match (public, friend, family) {
            (true, _, _) => "public",
            (false, true, true) => "friends+family",
            (false, true, false) => "friends",
            (false, false, true) => "family",
            (false, false, false) => "private",
        }
    }

    pub fn latitude(&self) -> String {
        self.text("/location/latitude")
    }

    pub fn longitude(&self) -> String {
        self.text("/location/longitude")
    }

    /// Human-readable place ("locality, county, region, country"), falling
    /// back to raw coordinates.
    pub fn location(&self) -> String {
        if self.0.get("location").is_none() {
            return String::new();
        }
        let parts: Vec<String> = ["locality", "county", "region", "country"]
            .iter()
            .map(|key| self.text(&format!("/location/{}/_content", key)))
            .filter(|s| !s.is_empty())
            .collect();
        if !parts.is_empty() {
            return parts.join(", ");
        }
        let (lat, lon) = (self.latitude(), self.longitude());
        if !lat.is_empty() && !lon.is_empty() {
            format!("{}, {}", lat, lon)
        } else {
            String::new()
        }
    }
}

/// One entry of `flickr.photos.getExif`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExifEntry {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub raw: Content,
}

/// Look up the raw value of the first EXIF entry with the given label.
pub fn exif_value(entries: &[ExifEntry], label: &str) -> String {
    entries
        .iter()
        .find(|e| e.label == label)
        .map(|e| e.raw.content.clone())
        .unwrap_or_default()
}
