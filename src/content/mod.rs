//! Engine output model plus the pure filtering/annotation stage.

pub mod filter;
pub mod hot_topic;

pub use filter::{decode_entities, strip_markup, ContentFilter};
pub use hot_topic::HotTopicDetector;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContentTag {
    #[serde(rename = "#hot-topic")]
    HotTopic,
    #[serde(rename = "#hot-issue")]
    HotIssue,
}

impl ContentTag {
    /// Both tags go together; an item is either hot or untagged.
    pub fn hot() -> BTreeSet<ContentTag> {
        [ContentTag::HotTopic, ContentTag::HotIssue].into_iter().collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentTag::HotTopic => "#hot-topic",
            ContentTag::HotIssue => "#hot-issue",
        }
    }
}

impl fmt::Display for ContentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cleaned, keyword-matched result handed to downstream stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub title: String,
    pub link: String,
    pub description: String,
    #[serde(default)]
    pub tags: BTreeSet<ContentTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl ContentItem {
    pub fn is_hot(&self) -> bool {
        !self.tags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_item_serializes_tags_as_hashtags() {
        let item = ContentItem {
            title: "t".into(),
            link: "https://example.com".into(),
            description: "d".into(),
            tags: ContentTag::hot(),
            published_at: None,
            author: Some("writer".into()),
        };

        assert_eq!(
            serde_json::to_value(&item).unwrap(),
            json!({
                "title": "t",
                "link": "https://example.com",
                "description": "d",
                "tags": ["#hot-topic", "#hot-issue"],
                "author": "writer"
            })
        );
        assert!(item.is_hot());
    }
}
