//! Path naming for downloaded items
//!
//! Maps item metadata to a readable, filesystem-safe relative directory and
//! file name so downloads organize themselves by album, series and season:
//!
//! - `Artist/Album/03 - Track`
//! - `Series (2019)/Season 2/Series - S2E5 - Episode`
//! - `Movie (2025)/Movie (2025)`
//!
//! An index of `0` is a real index. Only `None` means absent.

use mediadl_types::{ItemKind, MediaItem};
use unicode_normalization::UnicodeNormalization;

/// Characters that never reach the filesystem
const RESERVED_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|', '.'];

const UNKNOWN_ALBUM: &str = "Unknown Album";
const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Sanitize a raw name into a single safe path segment.
///
/// Trims, normalizes to NFC, replaces reserved characters with `-`, collapses
/// runs of `-` and strips them from both ends. Returns `None` when nothing
/// usable is left.
pub fn sanitize_name(raw: &str) -> Option<String> {
    let composed: String = raw.trim().nfc().collect();

    let mut sanitized = String::with_capacity(composed.len());
    for ch in composed.chars() {
        let ch = if RESERVED_CHARS.contains(&ch) { '-' } else { ch };
        if ch == '-' && sanitized.ends_with('-') {
            continue;
        }
        sanitized.push(ch);
    }

    let trimmed = sanitized.trim_matches(|c: char| c == '-' || c.is_whitespace());
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Relative directory (with trailing `/`) an item is stored under.
///
/// `None` means the caller should use the per-item legacy directory.
pub fn directory_for(item: &MediaItem) -> Option<String> {
    if let Some(album) = item.album.as_deref() {
        let album = sanitize_name(album).unwrap_or_else(|| UNKNOWN_ALBUM.to_string());

        if !item.kind.map(ItemKind::has_artist).unwrap_or(true) {
            return Some(format!("{}/", album));
        }

        let artist = item
            .album_artist
            .as_deref()
            .and_then(sanitize_name)
            .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
        return Some(format!("{}/{}/", artist, album));
    }

    if let (Some(series), Some(season)) = (item.series_name.as_deref(), item.parent_index_number) {
        if let Some(series) = sanitize_name(&with_year(series, item.production_year)) {
            return Some(format!("{}/Season {}/", series, season));
        }
    }

    sanitize_name(&with_year(display_name(item), item.production_year)).map(|name| format!("{}/", name))
}

/// File name (without extension) an item is stored as
pub fn file_name_for(item: &MediaItem) -> Option<String> {
    if item.album.is_some() {
        let index = item.index_number.map(|i| i.to_string());
        let parts = [index.as_deref(), non_blank(item.name.as_deref())];
        return sanitize_name(&join_present(&parts, " - "));
    }

    if let Some(series) = item.series_name.as_deref() {
        let code = episode_code(item);
        let parts = [
            non_blank(Some(series)),
            non_blank(Some(code.as_str())),
            non_blank(item.name.as_deref()),
        ];
        return sanitize_name(&join_present(&parts, " - "));
    }

    sanitize_name(&with_year(
        item.name.as_deref().unwrap_or_default(),
        item.production_year,
    ))
}

/// Display subtitle for a download list entry.
///
/// Episodes show `Series Name S1E5-6`, songs `Artist · Album`, anything else
/// its production year.
pub fn subtitle_for(item: &MediaItem) -> Option<String> {
    if let Some(series) = non_blank(item.series_name.as_deref()) {
        let code = episode_code(item);
        return Some(if code.is_empty() {
            series.to_string()
        } else {
            format!("{} {}", series, code)
        });
    }

    if non_blank(item.album.as_deref()).is_some() {
        let parts = [
            non_blank(item.album_artist.as_deref()),
            non_blank(item.album.as_deref()),
        ];
        return Some(join_present(&parts, " · "));
    }

    item.production_year.map(|year| year.to_string())
}

/// Compact season/episode code such as `S5E11-13`; empty when no index is set
pub fn episode_code(item: &MediaItem) -> String {
    let mut code = String::new();
    if let Some(season) = item.parent_index_number {
        code.push_str(&format!("S{}", season));
    }
    if let Some(episode) = item.index_number {
        code.push_str(&format!("E{}", episode));
    }
    if let Some(end) = item.index_number_end {
        code.push_str(&format!("-{}", end));
    }
    code
}

fn display_name(item: &MediaItem) -> &str {
    non_blank(item.series_name.as_deref())
        .or(item.name.as_deref())
        .unwrap_or_default()
}

fn with_year(name: &str, year: Option<i32>) -> String {
    let year = year.map(|y| format!("({})", y));
    join_present(&[non_blank(Some(name)), year.as_deref()], " ")
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn join_present(parts: &[Option<&str>], separator: &str) -> String {
    parts
        .iter()
        .flatten()
        .map(|p| p.trim())
        .collect::<Vec<_>>()
        .join(separator)
}
