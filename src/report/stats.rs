//! View statistics: account totals plus the most viewed photos, taken from
//! the stats API when the account has access to it and from per-photo view
//! counts otherwise.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::Local;
use serde::Serialize;
use serde_json::Value;

use super::ReportError;
use crate::api::error::ApiError;
use crate::flickr::types::{value_to_string, value_to_u64, Photo};
use crate::flickr::{photo_page_url, PhotosService, STATS_EXTRAS};
use crate::persist;

/// Page size requested from `flickr.stats.getPopularPhotos`.
const POPULAR_PER_PAGE: usize = 100;

#[derive(Debug, Clone)]
pub struct StatsOptions {
    pub top: usize,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedPhoto {
    pub rank: usize,
    pub id: String,
    pub title: String,
    pub views: u64,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_taken: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingSource {
    StatsApi,
    PhotoList,
}

/// Totals computed from the photo list when the stats API is unavailable.
#[derive(Debug, Clone, PartialEq)]
pub struct ListTotals {
    pub photos: usize,
    pub views: u64,
    pub average: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub generated_at: String,
    pub user_id: String,
    pub top_photos: Vec<RankedPhoto>,
    pub total_views: Option<Value>,
    #[serde(skip)]
    pub source: RankingSource,
    #[serde(skip)]
    pub list_totals: Option<ListTotals>,
}

impl StatsReport {
    /// Human-readable rendering for the terminal.
    pub fn render(&self) -> String {
        let rule = "=".repeat(70);
        let thin = "-".repeat(70);
        let mut out = String::new();

        if let Some(totals) = &self.total_views {
            let views = |key: &str| {
                totals
                    .get(key)
                    .and_then(|v| v.get("views"))
                    .map(value_to_string)
                    .unwrap_or_else(|| "N/A".to_string())
            };
            let _ = writeln!(out, "{}\nTotal Views Summary\n{}", rule, thin);
            let _ = writeln!(out, "  Photostream: {}", views("total"));
            let _ = writeln!(out, "  Photos: {}", views("photos"));
            let _ = writeln!(out, "  Sets: {}", views("sets"));
            let _ = writeln!(out, "  Collections: {}", views("collections"));
            let _ = writeln!(out, "{}", rule);
        }

        let heading = match self.source {
            RankingSource::StatsApi => "Most Popular Photos (from Stats API)",
            RankingSource::PhotoList => "Most Viewed Photos",
        };
        let _ = writeln!(out, "\nTop {} {}\n{}", self.top_photos.len(), heading, thin);
        for p in &self.top_photos {
            let title: String = p.title.chars().take(50).collect();
            let _ = writeln!(out, "{:3}. {:>8} views - {}", p.rank, p.views, title);
            let _ = writeln!(out, "     {}", p.url);
        }

        if let Some(t) = &self.list_totals {
            let _ = writeln!(out, "\n{}\nSummary\n{}", rule, thin);
            let _ = writeln!(out, "Total photos: {}", t.photos);
            let _ = writeln!(out, "Total views (from photo list): {}", t.views);
            let _ = writeln!(out, "Average views per photo: {:.1}", t.average);
            let _ = writeln!(out, "{}", rule);
        }
        out
    }
}

/// Optional stats calls: missing access (often a free account) degrades to
/// `None`; rate limits and rejected tokens still abort.
fn optional<T>(result: Result<T, ApiError>, what: &str) -> Result<Option<T>, ReportError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_rate_limited() || e.is_auth() => Err(e.into()),
        Err(e) => {
            tracing::warn!("{} failed: {}", what, e);
            Ok(None)
        }
    }
}

fn rank_popular(user_id: &str, popular: &[Value], top: usize) -> Vec<RankedPhoto> {
    popular
        .iter()
        .take(top)
        .enumerate()
        .map(|(i, p)| {
            let id = p.get("id").map(value_to_string).unwrap_or_default();
            let title = p
                .get("title")
                .map(value_to_string)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());
            RankedPhoto {
                rank: i + 1,
                url: photo_page_url(user_id, &id),
                id,
                title,
                views: p.pointer("/stats/views").and_then(value_to_u64).unwrap_or(0),
                date_taken: None,
            }
        })
        .collect()
}

/// Sort by views, highest first. Ties keep list order.
fn rank_by_views(user_id: &str, photos: &[Photo], top: usize) -> Vec<RankedPhoto> {
    let mut sorted: Vec<&Photo> = photos.iter().collect();
    sorted.sort_by(|a, b| b.views.cmp(&a.views));
    sorted
        .into_iter()
        .take(top)
        .enumerate()
        .map(|(i, p)| RankedPhoto {
            rank: i + 1,
            id: p.id.clone(),
            title: if p.title.is_empty() {
                "Untitled".to_string()
            } else {
                p.title.clone()
            },
            views: p.views,
            url: photo_page_url(user_id, &p.id),
            date_taken: Some(p.datetaken.clone().unwrap_or_else(|| "Unknown".to_string())),
        })
        .collect()
}

fn list_totals(photos: &[Photo]) -> ListTotals {
    let views: u64 = photos.iter().map(|p| p.views).sum();
    let average = if photos.is_empty() {
        0.0
    } else {
        views as f64 / photos.len() as f64
    };
    ListTotals {
        photos: photos.len(),
        views,
        average,
    }
}

pub async fn gather_stats(
    service: &PhotosService,
    options: &StatsOptions,
) -> Result<StatsReport, ReportError> {
    let user_id = service.user_id();

    let total_views = optional(service.total_views().await, "flickr.stats.getTotalViews")?
        .filter(|v| !v.is_null());

    tracing::info!("Fetching popular photos from stats API...");
    let popular = optional(
        service.popular_photos(POPULAR_PER_PAGE).await,
        "flickr.stats.getPopularPhotos",
    )?
    .filter(|p| !p.is_empty());

    let (top_photos, source, totals) = match popular {
        Some(popular) => {
            tracing::info!("Stats API returned {} popular photos", popular.len());
            (
                rank_popular(&user_id, &popular, options.top),
                RankingSource::StatsApi,
                None,
            )
        }
        None => {
            tracing::info!("Falling back to view counts from the photo list");
            let photos = service.all_photos(STATS_EXTRAS).await?;
            (
                rank_by_views(&user_id, &photos, options.top),
                RankingSource::PhotoList,
                Some(list_totals(&photos)),
            )
        }
    };

    let report = StatsReport {
        generated_at: Local::now()
            .naive_local()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string(),
        user_id,
        top_photos,
        total_views,
        source,
        list_totals: totals,
    };

    if let Some(path) = &options.output {
        let json = serde_json::to_vec_pretty(&report)?;
        persist::write_atomic_async(path.clone(), json, false).await?;
        tracing::info!("Results saved to: {}", path.display());
    }
    Ok(report)
}
