//! Catalogue export: one CSV row per photo with list-level fields, optional
//! per-photo detail and optional camera EXIF.

use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::membership::MembershipReport;
use super::{degrade, ReportError};
use crate::flickr::types::{exif_value, ExifEntry, Photo, PhotoDetails};
use crate::flickr::{photo_page_url, PhotosService, EXPORT_EXTRAS};
use crate::persist;

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub output: PathBuf,
    pub fetch_exif: bool,
    pub skip_detail: bool,
}

/// One output row. Field order matches [`COLUMNS`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct CsvRow {
    pub photo_id: String,
    pub title: String,
    pub description: String,
    pub filename: String,
    pub album: String,
    pub date_taken: String,
    pub date_uploaded: String,
    pub location: String,
    pub latitude: String,
    pub longitude: String,
    pub tags: String,
    pub machine_tags: String,
    pub privacy: String,
    pub views: u64,
    pub comments: String,
    pub faves: String,
    pub camera_model: String,
    pub lens: String,
    pub aperture: String,
    pub shutter_speed: String,
    pub iso: String,
    pub focal_length: String,
    pub media_type: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub total: usize,
    pub in_albums: usize,
    pub with_location: usize,
    pub public: usize,
    pub private: usize,
    pub total_views: u64,
    pub output: PathBuf,
}

impl ExportSummary {
    fn from_rows(rows: &[CsvRow], output: &Path) -> Self {
        Self {
            total: rows.len(),
            in_albums: rows.iter().filter(|r| !r.album.is_empty()).count(),
            with_location: rows.iter().filter(|r| !r.location.is_empty()).count(),
            public: rows.iter().filter(|r| r.privacy == "public").count(),
            private: rows.iter().filter(|r| r.privacy == "private").count(),
            total_views: rows.iter().map(|r| r.views).sum(),
            output: output.to_path_buf(),
        }
    }

    pub fn log(&self) {
        tracing::info!("── Export Summary ──");
        tracing::info!("  Total photos: {}", self.total);
        tracing::info!("  Photos in albums: {}", self.in_albums);
        tracing::info!("  Photos with location: {}", self.with_location);
        tracing::info!("  Public photos: {}", self.public);
        tracing::info!("  Private photos: {}", self.private);
        tracing::info!("  Total views: {}", self.total_views);
        tracing::info!("  Output file: {}", self.output.display());
    }
}

/// Epoch seconds as a local ISO-8601 timestamp without offset.
fn iso_from_epoch(epoch: i64) -> String {
    Local
        .timestamp_opt(epoch, 0)
        .single()
        .map(|dt| dt.naive_local().format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_default()
}

fn build_row(
    user_id: &str,
    photo: &Photo,
    albums: &str,
    details: &PhotoDetails,
    exif: &[ExifEntry],
) -> CsvRow {
    let description = if details.is_empty() {
        photo
            .description
            .as_ref()
            .map(|d| d.content.clone())
            .unwrap_or_default()
    } else {
        details.description()
    };
    let uploaded = details
        .date_uploaded()
        .or_else(|| photo.dateupload.parse().ok())
        .filter(|ts| *ts != 0)
        .map(iso_from_epoch)
        .unwrap_or_default();
    let comments = match details.comments() {
        c if c.is_empty() && !details.is_empty() => "0".to_string(),
        c => c,
    };
    let faves = details
        .raw()
        .get("faves")
        .map(crate::flickr::types::value_to_string)
        .unwrap_or_default();

    CsvRow {
        photo_id: photo.id.clone(),
        title: photo.title.clone(),
        description,
        filename: details
            .original_format()
            .or_else(|| photo.originalformat.clone())
            .unwrap_or_default(),
        album: albums.to_string(),
        date_taken: photo.datetaken.clone().unwrap_or_default(),
        date_uploaded: uploaded,
        location: details.location(),
        latitude: details.latitude(),
        longitude: details.longitude(),
        tags: photo.tags.clone(),
        machine_tags: photo.machine_tags.clone(),
        privacy: details.privacy().to_string(),
        views: photo.views,
        comments,
        faves,
        camera_model: exif_value(exif, "Model"),
        lens: exif_value(exif, "Lens"),
        aperture: exif_value(exif, "Aperture"),
        shutter_speed: exif_value(exif, "Exposure"),
        iso: exif_value(exif, "ISO Speed"),
        focal_length: exif_value(exif, "Focal Length"),
        media_type: photo.media.clone().unwrap_or_else(|| "photo".to_string()),
        url: photo_page_url(user_id, &photo.id),
    }
}

/// Album title → member mapping, using the "Untitled Album" fallback title.
pub async fn album_membership(service: &PhotosService) -> Result<MembershipReport, ReportError> {
    let mut membership = MembershipReport::new();
    for album in service.albums().await? {
        let title = if album.title.content.is_empty() {
            "Untitled Album"
        } else {
            album.title.content.as_str()
        };
        for photo in service.album_photos(&album.id, "").await? {
            membership.add(title, &photo.id);
        }
    }
    tracing::info!("Found {} photos in albums", membership.photos_in_albums());
    Ok(membership)
}

pub const COLUMNS: [&str; 24] = [
    "photo_id",
    "title",
    "description",
    "filename",
    "album",
    "date_taken",
    "date_uploaded",
    "location",
    "latitude",
    "longitude",
    "tags",
    "machine_tags",
    "privacy",
    "views",
    "comments",
    "faves",
    "camera_model",
    "lens",
    "aperture",
    "shutter_speed",
    "iso",
    "focal_length",
    "media_type",
    "url",
];

/// Header plus one record per row. The header is written even when there
/// are no rows.
pub fn encode_rows(rows: &[CsvRow]) -> Result<Vec<u8>, ReportError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| ReportError::Io(std::io::Error::other(e.to_string())))
}

pub async fn export_csv(
    service: &PhotosService,
    options: &ExportOptions,
    shutdown: &CancellationToken,
) -> Result<ExportSummary, ReportError> {
    let user_id = service.user_id();
    let membership = album_membership(service).await?;
    let photos = service.all_photos(EXPORT_EXTRAS).await?;

    let total = photos.len();
    tracing::info!("Processing {} photos...", total);
    let mut rows = Vec::with_capacity(total);
    for (i, photo) in photos.iter().enumerate() {
        if shutdown.is_cancelled() {
            return Err(ReportError::Interrupted);
        }

        let details = if options.skip_detail {
            PhotoDetails::default()
        } else {
            degrade(service.photo_info(&photo.id).await, "info", &photo.id)?
        };
        let exif = if options.fetch_exif {
            degrade(service.photo_exif(&photo.id).await, "EXIF", &photo.id)?
        } else {
            Vec::new()
        };

        let albums = membership.albums_of(&photo.id).join("; ");
        rows.push(build_row(&user_id, photo, &albums, &details, &exif));

        let done = i + 1;
        if done % 50 == 0 || done == total {
            tracing::info!("Processed {}/{} photos", done, total);
        }
    }

    let bytes = encode_rows(&rows)?;
    persist::write_atomic_async(options.output.clone(), bytes, false).await?;
    tracing::info!("Exported {} photos to {}", rows.len(), options.output.display());

    Ok(ExportSummary::from_rows(&rows, &options.output))
}
