//! Weighted hot-topic scoring.
//!
//! Each term group that has at least one match adds its weight once; an
//! exclamation or question mark in the title adds the emphasis bonus, and a
//! bracketed title tag such as `[속보]` adds the tag bonus. The item is hot
//! when the score reaches the threshold.

use log::debug;

#[derive(Debug, Clone, PartialEq)]
struct TermGroup {
    name: String,
    terms: Vec<String>,
    weight: f64,
}

impl TermGroup {
    fn matches(&self, haystack: &str) -> bool {
        self.terms.iter().any(|term| haystack.contains(term.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HotTopicDetector {
    groups: Vec<TermGroup>,
    threshold: f64,
    emphasis_bonus: f64,
    title_tags: Vec<String>,
    tag_bonus: f64,
}

impl Default for HotTopicDetector {
    /// No groups, so nothing is ever hot.
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            threshold: 1.0,
            emphasis_bonus: 0.0,
            title_tags: Vec::new(),
            tag_bonus: 0.0,
        }
    }
}

fn normalize(terms: impl IntoIterator<Item = impl AsRef<str>>) -> Vec<String> {
    terms
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

impl HotTopicDetector {
    /// Any single term match tags the item.
    pub fn from_terms(terms: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self::default().with_group("default", terms, 1.0)
    }

    pub fn with_group(
        mut self,
        name: impl Into<String>,
        terms: impl IntoIterator<Item = impl AsRef<str>>,
        weight: f64,
    ) -> Self {
        let terms = normalize(terms);
        if !terms.is_empty() {
            self.groups.push(TermGroup {
                name: name.into(),
                terms,
                weight,
            });
        }
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_emphasis_bonus(mut self, bonus: f64) -> Self {
        self.emphasis_bonus = bonus;
        self
    }

    /// `tags` are matched in brackets at any position of the title, so
    /// `"속보"` scores on `"[속보] ..."` but not on a bare `"속보"`.
    pub fn with_tag_bonus(
        mut self,
        tags: impl IntoIterator<Item = impl AsRef<str>>,
        bonus: f64,
    ) -> Self {
        self.title_tags = normalize(tags)
            .into_iter()
            .map(|tag| format!("[{}]", tag.trim_matches(|c: char| c == '[' || c == ']')))
            .collect();
        self.tag_bonus = bonus;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn score(&self, title: &str, description: &str) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let haystack = format!("{} {}", title, description).to_lowercase();

        let mut score: f64 = self
            .groups
            .iter()
            .filter(|group| group.matches(&haystack))
            .map(|group| group.weight)
            .sum();

        if title.contains('!') || title.contains('?') {
            score += self.emphasis_bonus;
        }
        let title = title.to_lowercase();
        if self.title_tags.iter().any(|tag| title.contains(tag.as_str())) {
            score += self.tag_bonus;
        }
        score
    }

    pub fn is_hot(&self, title: &str, description: &str) -> bool {
        if self.is_empty() {
            return false;
        }
        let score = self.score(title, description);
        let hot = score >= self.threshold;
        if hot {
            debug!("🔥 '{}' scored {:.2} (threshold {:.2})", title, score, self.threshold);
        }
        hot
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name.as_str()).collect()
    }
}
