use std::path::{Path, PathBuf};

/// Folder receiving items that belong to no album.
pub const UNSORTED_FOLDER: &str = "Unsorted";

/// Folder name for an album: alphanumerics, spaces, `-` and `_` only, trimmed.
/// Titles that reduce to nothing fall back to `album-<id>`.
pub fn album_folder_name(title: &str, album_id: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        format!("album-{}", clean_filename(album_id))
    } else {
        cleaned.to_string()
    }
}

/// Clean a filename by removing characters that are invalid on common
/// filesystems: `/`, `\`, `:`, `*`, `?`, `"`, `<`, `>`, `|`.
pub fn clean_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect()
}

/// `<id>.<format>`, with the format lowercased and restricted to ASCII
/// alphanumerics. Missing formats default to `jpg`.
pub fn asset_filename(photo_id: &str, original_format: Option<&str>) -> String {
    let ext: String = original_format
        .unwrap_or("")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let ext = if ext.is_empty() { "jpg".to_string() } else { ext };
    format!("{}.{}", clean_filename(photo_id), ext)
}

/// Temporary name used while an asset is written: `<stem>.part.<ext>`.
/// The real extension stays last so format detection still works on it.
pub fn part_path(final_path: &Path) -> PathBuf {
    let stem = final_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match final_path.extension() {
        Some(ext) => format!("{}.part.{}", stem, ext.to_string_lossy()),
        None => format!("{}.part", stem),
    };
    final_path.with_file_name(name)
}

/// `<asset>.json`, next to the asset.
pub fn sidecar_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".json");
    final_path.with_file_name(name)
}

pub fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .map(|e| {
            let e = e.to_string_lossy();
            e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg")
        })
        .unwrap_or(false)
}
