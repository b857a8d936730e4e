// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 Cranky Kernel <crankykernel@proton.me>

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::debug;

use crate::catalog::CatalogSnapshot;

/// Escapes markup characters and drops control characters XML 1.0 does not allow.
fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if c.is_ascii_control() => {}
            '\u{FFFE}' | '\u{FFFF}' => {}
            c => out.push(c),
        }
    }
    out
}

/// XMLTV timestamp, always in UTC.
pub fn xmltv_time(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S +0000").to_string()
}

/// Renders an XMLTV guide. Every live event gets a channel record, whether or
/// not its stream is currently resolvable; a programme is only emitted when
/// both start and end times are known.
pub fn render_guide(snapshot: &CatalogSnapshot, generator_name: &str, now: DateTime<Utc>) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<!DOCTYPE tv SYSTEM \"xmltv.dtd\">\n");
    xml.push_str(&format!(
        "<tv generator-info-name=\"{}\">\n",
        escape_xml(generator_name)
    ));

    let mut seen = HashSet::new();
    for event in snapshot.live_events(now) {
        if !seen.insert(event.channel_id.as_str()) {
            continue;
        }
        xml.push_str(&format!(
            "  <channel id=\"{}\">\n",
            escape_xml(&event.channel_id)
        ));
        xml.push_str(&format!(
            "    <display-name>{}</display-name>\n",
            escape_xml(&event.title)
        ));
        if let Some(logo) = &event.logo_url {
            xml.push_str(&format!("    <icon src=\"{}\" />\n", escape_xml(logo)));
        }
        xml.push_str("  </channel>\n");
    }

    for event in snapshot.live_events(now) {
        let (Some(start), Some(stop)) = (event.starts_at, event.ends_at) else {
            debug!(
                "Skipping programme for {} ('{}'): missing start/end time",
                event.channel_id, event.title
            );
            continue;
        };

        let category = event.sport.as_str();
        let description = match &event.tag {
            Some(tag) => format!("{} - {}", category, tag),
            None => category.to_string(),
        };

        xml.push_str(&format!(
            "  <programme start=\"{}\" stop=\"{}\" channel=\"{}\">\n",
            xmltv_time(start),
            xmltv_time(stop),
            escape_xml(&event.channel_id)
        ));
        xml.push_str(&format!(
            "    <title lang=\"en\">{}</title>\n",
            escape_xml(&event.title)
        ));
        xml.push_str(&format!(
            "    <desc lang=\"en\">{}</desc>\n",
            escape_xml(&description)
        ));
        if let Some(logo) = &event.logo_url {
            xml.push_str(&format!("    <icon src=\"{}\" />\n", escape_xml(logo)));
        }
        xml.push_str(&format!(
            "    <category lang=\"en\">{}</category>\n",
            category
        ));
        xml.push_str("  </programme>\n");
    }

    xml.push_str("</tv>\n");
    xml
}

/// Channel ids declared by a rendered guide, in document order.
pub fn guide_channel_ids(guide: &str) -> Vec<String> {
    guide
        .lines()
        .filter_map(|line| {
            let rest = line.trim_start().strip_prefix("<channel id=\"")?;
            Some(rest[..rest.find('"')?].to_string())
        })
        .collect()
}
