//! Link extraction from free text.
//!
//! Share text pasted from apps mixes the URL with CJK prose,
//! full-width punctuation and tracking query params. Patterns are
//! tried in confidence order; known douyin shapes outrank the generic
//! URL match.

use std::collections::HashSet;

use regex::Regex;
use url::Url;

/// Trailing characters that belong to the surrounding sentence, not
/// the URL.
const TRAILING_PUNCTUATION: &[char] = &[
    ',', '.', ';', ':', '!', '?', ')', ']', '}', '>', '"', '\'', '，', '。', '！', '？', '、',
    '；', '：', '）', '》', '】', '”', '’', '…',
];

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedLink {
    pub url: String,
    /// How confident we are that this is the intended video link.
    pub confidence: f64,
}

pub struct LinkExtractor {
    patterns: Vec<(Regex, f64)>,
}

impl Default for LinkExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkExtractor {
    pub fn new() -> Self {
        // static literals, a failure here is a programming error
        let patterns = vec![
            (
                Regex::new(r"https?://v\.douyin\.com/[A-Za-z0-9_-]+/?").unwrap(),
                0.95,
            ),
            (
                Regex::new(r"https?://www\.douyin\.com/video/\d+").unwrap(),
                0.9,
            ),
            (
                Regex::new(r"https?://www\.iesdouyin\.com/share/video/\d+").unwrap(),
                0.85,
            ),
            (
                Regex::new(r#"https?://[^\s，。！？、；：“”‘’（）《》【】]+"#).unwrap(),
                0.5,
            ),
        ];
        Self { patterns }
    }

    /// All candidate links, highest confidence first, deduplicated
    /// after normalization.
    pub fn extract(&self, text: &str) -> Vec<ExtractedLink> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for (pattern, confidence) in &self.patterns {
            for found in pattern.find_iter(text) {
                let url = normalize_url(found.as_str());
                if seen.insert(url.clone()) {
                    links.push(ExtractedLink {
                        url,
                        confidence: *confidence,
                    });
                }
            }
        }
        links
    }

    /// The most plausible video link in the text, if any.
    pub fn best(&self, text: &str) -> Option<ExtractedLink> {
        self.extract(text).into_iter().next()
    }
}

/// Trim sentence punctuation and strip `utm_*` tracking params.
fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim_end_matches(TRAILING_PUNCTUATION);
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    if url.query().is_some() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !key.starts_with("utm_"))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut()
                .clear()
                .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_link_inside_share_text() {
        let extractor = LinkExtractor::new();
        let text = "7.43 复制打开抖音，看看【精彩作品】 https://v.douyin.com/iJwqXvR/ 多有意思！";
        let best = extractor.best(text).unwrap();
        assert_eq!(best.url, "https://v.douyin.com/iJwqXvR/");
        assert!((best.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn tracking_params_are_stripped() {
        let extractor = LinkExtractor::new();
        let text = "https://www.douyin.com/video/7301234567890123456?utm_source=share&utm_medium=ios";
        let best = extractor.best(text).unwrap();
        assert_eq!(best.url, "https://www.douyin.com/video/7301234567890123456");
    }

    #[test]
    fn non_tracking_params_survive() {
        let extractor = LinkExtractor::new();
        let best = extractor
            .best("打开 https://example.com/watch?v=42&utm_campaign=x 看看")
            .unwrap();
        assert_eq!(best.url, "https://example.com/watch?v=42");
        assert!((best.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn known_shapes_outrank_generic_urls() {
        let extractor = LinkExtractor::new();
        let text = "先看 https://example.com/other 再看 https://v.douyin.com/iAbCdE/";
        let links = extractor.extract(text);
        assert_eq!(links[0].url, "https://v.douyin.com/iAbCdE/");
        assert!(links[0].confidence > links[1].confidence);
    }

    #[test]
    fn ascii_sentence_punctuation_is_trimmed() {
        let extractor = LinkExtractor::new();
        let best = extractor.best("Check https://cdn.example.com/a.mp4. Then reply.").unwrap();
        assert_eq!(best.url, "https://cdn.example.com/a.mp4");
    }

    #[test]
    fn text_without_links_yields_nothing() {
        let extractor = LinkExtractor::new();
        assert!(extractor.extract("今天天气不错，适合拍视频。").is_empty());
        assert!(extractor.best("no links here").is_none());
    }
}
