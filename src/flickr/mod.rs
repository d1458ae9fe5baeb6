//! Typed access to the photo-hosting API: enumeration of the whole
//! collection, albums and their members, per-photo detail, EXIF and stats.

pub mod paginate;
pub mod types;

use std::path::Path;

use serde_json::Value;

use self::paginate::{
    collect_all, ListMethod, DEFAULT_PAGE_SIZE, PEOPLE_GET_PHOTOS, PHOTOSETS_GET_LIST,
    PHOTOSETS_GET_PHOTOS,
};
use self::types::{Album, ExifEntry, Photo, PhotoDetails};
use crate::api::error::ApiError;
use crate::api::ResilientApiClient;

/// Extras needed to download originals and name them.
pub const BACKUP_EXTRAS: &str = "url_o,original_format,media,date_taken";

/// Extras for the CSV export.
pub const EXPORT_EXTRAS: &str = "description,date_taken,date_upload,views,tags,machine_tags,geo,media,original_format,owner_name,url_o,url_sq";

/// Extras for view statistics.
pub const STATS_EXTRAS: &str = "views,date_taken,date_upload,url_sq,url_m";

/// Public page of a photo.
pub fn photo_page_url(user_id: &str, photo_id: &str) -> String {
    format!("https://www.flickr.com/photos/{}/{}", user_id, photo_id)
}

pub struct PhotosService {
    client: ResilientApiClient,
    page_size: u32,
}

impl PhotosService {
    pub fn new(client: ResilientApiClient) -> Self {
        Self {
            client,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    #[cfg(test)]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn client_mut(&mut self) -> &mut ResilientApiClient {
        &mut self.client
    }

    /// Account the bound session belongs to, or `me` before authentication.
    pub fn user_id(&self) -> String {
        self.client.account_id().unwrap_or("me").to_string()
    }

    async fn collect<T: serde::de::DeserializeOwned>(
        &self,
        list: &ListMethod,
        fixed: &[(String, String)],
    ) -> Result<Vec<T>, ApiError> {
        let raw = collect_all(&self.client, list, fixed, self.page_size).await?;
        let mut out = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<T>(value) {
                Ok(item) => out.push(item),
                Err(e) => tracing::warn!("Skipping malformed {} entry: {}", list.item, e),
            }
        }
        Ok(out)
    }

    /// Every photo owned by the account, in server order.
    pub async fn all_photos(&self, extras: &str) -> Result<Vec<Photo>, ApiError> {
        tracing::info!("Fetching all photos...");
        let photos: Vec<Photo> = self
            .collect(
                &PEOPLE_GET_PHOTOS,
                &[
                    ("user_id".into(), self.user_id()),
                    ("extras".into(), extras.to_string()),
                ],
            )
            .await?;
        tracing::info!("Found {} photos", photos.len());
        Ok(photos)
    }

    pub async fn albums(&self) -> Result<Vec<Album>, ApiError> {
        tracing::info!("Fetching albums...");
        let albums: Vec<Album> = self
            .collect(&PHOTOSETS_GET_LIST, &[("user_id".into(), self.user_id())])
            .await?;
        tracing::info!("Found {} albums", albums.len());
        Ok(albums)
    }

    pub async fn album_photos(&self, album_id: &str, extras: &str) -> Result<Vec<Photo>, ApiError> {
        self.collect(
            &PHOTOSETS_GET_PHOTOS,
            &[
                ("photoset_id".into(), album_id.to_string()),
                ("user_id".into(), self.user_id()),
                ("extras".into(), extras.to_string()),
            ],
        )
        .await
    }

    pub async fn photo_info(&self, photo_id: &str) -> Result<PhotoDetails, ApiError> {
        let value = self
            .client
            .call(
                "flickr.photos.getInfo",
                &[("photo_id".into(), photo_id.to_string())],
            )
            .await?;
        match value.get("photo") {
            Some(photo) => Ok(PhotoDetails(photo.clone())),
            None => Err(ApiError::protocol(format!(
                "getInfo for {} returned no photo",
                photo_id
            ))),
        }
    }

    pub async fn photo_exif(&self, photo_id: &str) -> Result<Vec<ExifEntry>, ApiError> {
        let value = self
            .client
            .call(
                "flickr.photos.getExif",
                &[("photo_id".into(), photo_id.to_string())],
            )
            .await?;
        let entries = value
            .pointer("/photo/exif")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(entries)
            .map_err(|e| ApiError::protocol(format!("Malformed EXIF for {}: {}", photo_id, e)))
    }

    /// `stats` object of `flickr.stats.getTotalViews`.
    pub async fn total_views(&self) -> Result<Value, ApiError> {
        let value = self.client.call("flickr.stats.getTotalViews", &[]).await?;
        Ok(value.get("stats").cloned().unwrap_or(Value::Null))
    }

    /// Single page of `flickr.stats.getPopularPhotos`.
    pub async fn popular_photos(&self, per_page: usize) -> Result<Vec<Value>, ApiError> {
        let value = self
            .client
            .call(
                "flickr.stats.getPopularPhotos",
                &[("per_page".into(), per_page.to_string())],
            )
            .await?;
        Ok(value
            .pointer("/photos/photo")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, ApiError> {
        self.client.download(url, dest).await
    }
}
