// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 Cranky Kernel <crankykernel@proton.me>

use chrono::{DateTime, Utc};

use crate::catalog::CatalogSnapshot;
use crate::resolved::ResolvedUrlCache;

/// M3U attribute values cannot carry quotes or line breaks.
fn attr(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '"' => '\'',
            '\r' | '\n' => ' ',
            c => c,
        })
        .collect()
}

/// Renders an extended M3U playlist with one entry per live event that has a
/// fresh resolved URL. Events without a URL are left out rather than emitted
/// with a blank one.
pub fn render_playlist(
    snapshot: &CatalogSnapshot,
    urls: &ResolvedUrlCache,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::from("#EXTM3U\n");

    for event in snapshot.live_events(now) {
        let Some(url) = urls.get(&event.id, now) else {
            continue;
        };
        let name = attr(&event.title);
        out.push_str(&format!(
            "#EXTINF:-1 tvg-id=\"{}\" tvg-name=\"{}\" tvg-logo=\"{}\" group-title=\"{}\",{}\n",
            event.channel_id,
            name,
            attr(event.logo_url.as_deref().unwrap_or("")),
            event.sport,
            name
        ));
        out.push_str(url.trim());
        out.push('\n');
    }

    out
}

/// Channel ids in the order they appear in a rendered playlist.
pub fn playlist_channel_ids(playlist: &str) -> Vec<String> {
    playlist
        .lines()
        .filter(|line| line.starts_with("#EXTINF"))
        .filter_map(|line| {
            let start = line.find("tvg-id=\"")? + "tvg-id=\"".len();
            let end = line[start..].find('"')? + start;
            Some(line[start..end].to_string())
        })
        .collect()
}
