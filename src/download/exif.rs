use std::path::Path;

use anyhow::{Context, Result};

use crate::flickr::types::PhotoDetails;

/// `XPKeywords` in IFD0; little_exif has no named variant for it.
const XP_KEYWORDS: u16 = 0x9c9e;
/// Character code prefix of an `UNDEFINED` `UserComment`.
const UNDEFINED_CHARSET: [u8; 8] = [0; 8];
const MAX_TAG_BYTES: usize = 65535;

/// Fields from the photo's detail written into a downloaded JPEG.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddedMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    /// Already in EXIF form, `YYYY:MM:DD HH:MM:SS`.
    pub date_taken: Option<String>,
}

impl EmbeddedMetadata {
    pub fn from_details(details: &PhotoDetails) -> Self {
        Self {
            title: Some(details.title()).filter(|t| !t.is_empty()),
            description: Some(details.description()).filter(|d| !d.trim().is_empty()),
            tags: details.tags(),
            date_taken: details.date_taken().as_deref().and_then(exif_datetime),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.tags.is_empty()
            && self.date_taken.is_none()
    }
}

/// UTF-16LE, comma separated, as Windows reads `XPKeywords`.
fn xp_keywords(tags: &[String]) -> Vec<u8> {
    let mut bytes: Vec<u8> = tags
        .join(", ")
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect();
    bytes.truncate((MAX_TAG_BYTES - 2) & !1);
    bytes.extend_from_slice(&[0, 0]);
    bytes
}

fn user_comment(description: &str) -> Vec<u8> {
    let mut bytes = UNDEFINED_CHARSET.to_vec();
    bytes.extend_from_slice(description.as_bytes());
    bytes.truncate(MAX_TAG_BYTES);
    bytes
}

/// Convert the service's `YYYY-MM-DD HH:MM:SS` into the EXIF datetime form.
pub fn exif_datetime(date_taken: &str) -> Option<String> {
    chrono::NaiveDateTime::parse_from_str(date_taken.trim(), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.format("%Y:%m:%d %H:%M:%S").to_string())
}

/// Read the `DateTimeOriginal` EXIF tag from an image file.
///
/// Returns `Ok(Some(value))` if the tag is present, `Ok(None)` if the file
/// has no EXIF data or the tag is missing, and `Err` only on I/O failure.
pub fn get_photo_exif(path: &Path) -> Result<Option<String>> {
    let file =
        std::fs::File::open(path).with_context(|| format!("Opening {}", path.display()))?;
    let mut bufreader = std::io::BufReader::new(&file);
    let exif_reader = exif::Reader::new();

    match exif_reader.read_from_container(&mut bufreader) {
        Ok(exif_data) => Ok(exif_data
            .get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)
            .map(|field| field.display_value().to_string())),
        Err(e) => {
            tracing::debug!("No EXIF data in {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

/// Write title (`ImageDescription`), description (`UserComment`), tags
/// (`XPKeywords`) and, when the file has none yet, `DateTimeOriginal` into a
/// JPEG in place.
pub fn embed_metadata(path: &Path, meta: &EmbeddedMetadata) -> Result<()> {
    use little_exif::exif_tag::ExifTag;
    use little_exif::ifd::ExifTagGroup;
    use little_exif::metadata::Metadata;

    let date_to_set = match &meta.date_taken {
        Some(date) if get_photo_exif(path)?.is_none() => Some(date.clone()),
        _ => None,
    };
    if meta.title.is_none()
        && meta.description.is_none()
        && meta.tags.is_empty()
        && date_to_set.is_none()
    {
        return Ok(());
    }

    let mut metadata = Metadata::new_from_path(path)
        .with_context(|| format!("Reading EXIF metadata from {}", path.display()))?;
    if let Some(title) = &meta.title {
        metadata.set_tag(ExifTag::ImageDescription(title.clone()));
    }
    if let Some(description) = &meta.description {
        metadata.set_tag(ExifTag::UserComment(user_comment(description)));
    }
    if !meta.tags.is_empty() {
        metadata.set_tag(ExifTag::UnknownINT8U(
            xp_keywords(&meta.tags),
            XP_KEYWORDS,
            ExifTagGroup::GENERIC,
        ));
    }
    if let Some(date) = &date_to_set {
        metadata.set_tag(ExifTag::DateTimeOriginal(date.clone()));
    }
    metadata
        .write_to_file(path)
        .with_context(|| format!("Writing EXIF metadata to {}", path.display()))?;

    tracing::debug!(
        title = ?meta.title,
        tags = meta.tags.len(),
        date = ?date_to_set,
        "Embedded metadata into {}",
        path.display()
    );
    Ok(())
}
