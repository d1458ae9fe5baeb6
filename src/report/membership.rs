use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::persist;

pub const MEMBERSHIP_FILE: &str = "albums.json";

/// Album title → member ids, and the reverse index, preserving items that
/// belong to several albums.
#[derive(Debug, Default, Serialize)]
pub struct MembershipReport {
    albums: BTreeMap<String, Vec<String>>,
    photos: BTreeMap<String, Vec<String>>,
    unsorted: Vec<String>,
}

impl MembershipReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, album_title: &str, photo_id: &str) {
        let members = self.albums.entry(album_title.to_string()).or_default();
        if !members.iter().any(|m| m == photo_id) {
            members.push(photo_id.to_string());
        }
        let titles = self.photos.entry(photo_id.to_string()).or_default();
        if !titles.iter().any(|t| t == album_title) {
            titles.push(album_title.to_string());
        }
    }

    pub fn add_unsorted(&mut self, photo_id: &str) {
        self.unsorted.push(photo_id.to_string());
    }

    pub fn is_member(&self, photo_id: &str) -> bool {
        self.photos.contains_key(photo_id)
    }

    pub fn albums_of(&self, photo_id: &str) -> &[String] {
        self.photos.get(photo_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn members_of(&self, album_title: &str) -> &[String] {
        self.albums.get(album_title).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct photos in at least one album.
    pub fn photos_in_albums(&self) -> usize {
        self.photos.len()
    }

    /// Atomically write `albums.json` into `dir`.
    pub async fn write(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        let path = dir.join(MEMBERSHIP_FILE);
        let json = serde_json::to_vec_pretty(self)?;
        persist::write_atomic_async(path.clone(), json, false).await?;
        Ok(path)
    }
}
