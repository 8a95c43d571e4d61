//! Deterministic metrics over one summary window. Pure: no I/O, no clock.

use crate::digest::message::{Message, SummaryWindow};
use crate::digest::util::truncate_with_ellipsis;
use crate::digest::zone::Zone;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

pub const TOP_MEMBERS: usize = 5;
pub const BUSIEST_SPAN_HOURS: usize = 2;
pub const MAX_SEGMENT_PREVIEWS: usize = 18;
pub const PREVIEW_CHARS: usize = 120;
pub const LINK_SNIPPET_CHARS: usize = 140;
pub const MAX_LINKS: usize = 8;

/// Local-hour ranges `[start, end)`; every hour of the day belongs to exactly one.
pub const SEGMENTS: [(&str, u32, u32); 5] = [
    ("Madrugada", 0, 6),
    ("Manhã", 6, 12),
    ("Início da tarde", 12, 16),
    ("Fim da tarde", 16, 19),
    ("Noite", 19, 24),
];

const LINK_PATTERN: &str = r#"(?i)\b(?:https?://|www\.)[^\s<>"'`]+"#;
const LINK_TRAILING: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '\'', '"'];

static LINK_RE: OnceLock<Option<Regex>> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberCount {
    pub name: String,
    pub messages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusiestPeriod {
    pub start_hour: u32,
    pub end_hour: u32,
    pub label: String,
    pub messages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentActivity {
    pub label: String,
    pub start_hour: u32,
    pub end_hour: u32,
    pub messages: usize,
    pub previews: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedLink {
    pub url: String,
    pub sender: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_messages: usize,
    pub unique_participants: usize,
    pub window_start: String,
    pub window_end: String,
    pub timezone: String,
    pub top_members: Vec<MemberCount>,
    pub busiest_period: Option<BusiestPeriod>,
    pub segments: Vec<SegmentActivity>,
    pub shared_links: Vec<SharedLink>,
}

impl Stats {
    #[cfg(test)]
    pub fn segment(&self, label: &str) -> Option<&SegmentActivity> {
        self.segments.iter().find(|s| s.label == label)
    }
}

pub fn aggregate(messages: &[Message], window: &SummaryWindow, zone: &Zone) -> Stats {
    let mut ordered = messages.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|m| m.timestamp);

    let top_members = top_members(&ordered);
    let unique_participants = ordered
        .iter()
        .map(|m| m.sender.as_str())
        .collect::<HashSet<_>>()
        .len();

    Stats {
        total_messages: ordered.len(),
        unique_participants,
        window_start: zone.rfc3339(window.start_ms),
        window_end: zone.rfc3339(window.end_ms),
        timezone: zone.name().to_string(),
        top_members,
        busiest_period: busiest_period(&ordered, zone),
        segments: segments(&ordered, zone),
        shared_links: shared_links(&ordered),
    }
}

fn top_members(ordered: &[&Message]) -> Vec<MemberCount> {
    let mut index = HashMap::<&str, usize>::new();
    let mut counts = Vec::<MemberCount>::new();
    for message in ordered {
        match index.get(message.sender.as_str()) {
            Some(&slot) => counts[slot].messages += 1,
            None => {
                index.insert(message.sender.as_str(), counts.len());
                counts.push(MemberCount {
                    name: message.sender.clone(),
                    messages: 1,
                });
            }
        }
    }
    // Stable sort: equal counts keep first-appearance order.
    counts.sort_by(|a, b| b.messages.cmp(&a.messages));
    counts.truncate(TOP_MEMBERS);
    counts
}

fn busiest_period(ordered: &[&Message], zone: &Zone) -> Option<BusiestPeriod> {
    let mut hours = [0usize; 24];
    for message in ordered {
        hours[zone.local_hour(message.timestamp) as usize] += 1;
    }

    let mut best: Option<(usize, usize)> = None;
    for start in 0..=(24 - BUSIEST_SPAN_HOURS) {
        let count = hours[start..start + BUSIEST_SPAN_HOURS].iter().sum::<usize>();
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((start, count));
        }
    }

    let (start, count) = best?;
    if count == 0 {
        return None;
    }
    let start_hour = start as u32;
    let end_hour = (start + BUSIEST_SPAN_HOURS) as u32;
    Some(BusiestPeriod {
        start_hour,
        end_hour,
        label: format!("{start_hour:02}h–{end_hour:02}h"),
        messages: count,
    })
}

fn segments(ordered: &[&Message], zone: &Zone) -> Vec<SegmentActivity> {
    let mut out = SEGMENTS
        .iter()
        .map(|(label, start, end)| SegmentActivity {
            label: (*label).to_string(),
            start_hour: *start,
            end_hour: *end,
            messages: 0,
            previews: Vec::new(),
        })
        .collect::<Vec<_>>();

    for message in ordered {
        let hour = zone.local_hour(message.timestamp);
        let Some(segment) = out
            .iter_mut()
            .find(|s| hour >= s.start_hour && hour < s.end_hour)
        else {
            continue;
        };
        segment.messages += 1;
        if segment.previews.len() < MAX_SEGMENT_PREVIEWS {
            segment.previews.push(format!(
                "{} — {}: {}",
                zone.clock_label(message.timestamp),
                message.sender,
                truncate_with_ellipsis(message.display_content(), PREVIEW_CHARS)
            ));
        }
    }
    out
}

fn link_regex() -> Option<&'static Regex> {
    LINK_RE.get_or_init(|| Regex::new(LINK_PATTERN).ok()).as_ref()
}

/// URL-like substrings in first-seen order, trailing punctuation trimmed.
pub fn extract_urls(text: &str) -> Vec<String> {
    let Some(re) = link_regex() else {
        return Vec::new();
    };
    re.find_iter(text)
        .map(|m| m.as_str().trim_end_matches(LINK_TRAILING).to_string())
        .filter(|url| url.len() > "www.".len())
        .collect()
}

fn shared_links(ordered: &[&Message]) -> Vec<SharedLink> {
    let mut seen = HashSet::<String>::new();
    let mut out = Vec::new();
    for message in ordered {
        for url in extract_urls(&message.content) {
            if !seen.insert(url.clone()) {
                continue;
            }
            out.push(SharedLink {
                url,
                sender: message.sender.clone(),
                snippet: truncate_with_ellipsis(&message.content, LINK_SNIPPET_CHARS),
            });
            if out.len() >= MAX_LINKS {
                return out;
            }
        }
    }
    out
}
