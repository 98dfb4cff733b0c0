use crate::api::types::RawItem;
use crate::content::hot_topic::HotTopicDetector;
use crate::content::{ContentItem, ContentTag};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

static MARKUP_TAG: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"<[^<]+?>").ok());

/// Remove anything that looks like a markup tag.
pub fn strip_markup(text: &str) -> String {
    match MARKUP_TAG.as_ref() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// Decode the handful of entities the upstream emits. `&amp;` goes last so
/// `&amp;lt;` becomes the literal text `&lt;`.
pub fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn contains_keyword(text: &str, needle: &str) -> bool {
    text.to_lowercase().contains(needle)
}

/// Turns raw upstream records into [`ContentItem`]s: clean, keyword-match,
/// tag, stop at the limit.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    detector: HotTopicDetector,
}

impl ContentFilter {
    pub fn new(detector: HotTopicDetector) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &HotTopicDetector {
        &self.detector
    }

    /// Never fails: malformed records are logged and skipped. An empty
    /// keyword keeps every well-formed record. The keyword is matched against
    /// the tag-stripped text before entities are decoded.
    pub fn filter(&self, raw_items: &[Value], keyword: &str, limit: usize) -> Vec<ContentItem> {
        let needle = keyword.trim().to_lowercase();
        let mut kept = Vec::with_capacity(limit.min(raw_items.len()));

        for (index, value) in raw_items.iter().enumerate() {
            if kept.len() >= limit {
                break;
            }

            let raw = match RawItem::deserialize(value) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("⚠️ Skipping malformed item #{}: {}", index, e);
                    continue;
                }
            };

            let stripped_title = strip_markup(&raw.title);
            let stripped_description = strip_markup(&raw.description);

            if !needle.is_empty()
                && !contains_keyword(&stripped_title, &needle)
                && !contains_keyword(&stripped_description, &needle)
            {
                continue;
            }

            let title = decode_entities(&stripped_title).trim().to_string();
            let description = decode_entities(&stripped_description).trim().to_string();

            let tags = if self.detector.is_hot(&title, &description) {
                ContentTag::hot()
            } else {
                BTreeSet::new()
            };

            kept.push(ContentItem {
                title,
                link: raw.link.trim().to_string(),
                description,
                tags,
                published_at: raw.pub_date.or(raw.post_date),
                author: raw.bloggername,
            });
        }

        debug!(
            "Filter kept {}/{} item(s) for '{}' (limit {})",
            kept.len(),
            raw_items.len(),
            keyword,
            limit
        );
        kept
    }
}
