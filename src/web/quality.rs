//! Heuristic 0-10 content quality scorer (spec §4.C). Carried over verbatim
//! from the keyword list and point values the Python original uses
//! (`web_scraper.py _calculate_content_quality`).
use crate::orchestrator::model::ScrapedDocument;

/// Career-related vocabulary; each hit adds 0.3, capped at +2.0 total.
const PROFESSIONAL_KEYWORDS: &[&str] = &[
    "experience",
    "career",
    "professional",
    "skills",
    "expertise",
    "leadership",
    "management",
    "strategy",
    "achievement",
    "project",
    "team",
    "company",
    "industry",
    "certification",
    "degree",
    "university",
    "role",
    "position",
    "responsibilities",
    "accomplishments",
];

/// Phrases that mark placeholder/stub content; any hit is a hard -3.0.
const LOW_QUALITY_MARKERS: &[&str] = &[
    "lorem ipsum",
    "page not found",
    "coming soon",
    "under construction",
    "404 error",
    "access denied",
    "please enable javascript",
    "this content is not available",
];

/// Pure function over an already-extracted document; does not re-fetch or
/// mutate anything. Base score 5.0, clamped to `[0, 10]`.
#[must_use]
pub fn score(doc: &ScrapedDocument) -> f64 {
    let mut score = 5.0_f64;
    let len = doc.content.chars().count();

    score += match len {
        1000..=5000 => 1.5,
        500..1000 => 1.0,
        _ if len < 200 => -2.0,
        _ if len > 8000 => -0.5,
        _ => 0.0,
    };

    let lowercase = doc.content.to_lowercase();
    let keyword_hits = PROFESSIONAL_KEYWORDS
        .iter()
        .filter(|kw| lowercase.contains(*kw))
        .count();
    #[allow(clippy::cast_precision_loss)]
    let keyword_bonus = (keyword_hits as f64 * 0.3).min(2.0);
    score += keyword_bonus;

    if doc.headings.len() >= 2 {
        score += 1.0;
    }
    if doc.published_date.is_some() {
        score += 0.5;
    }
    if doc.author.is_some() {
        score += 0.5;
    }
    if LOW_QUALITY_MARKERS.iter().any(|marker| lowercase.contains(marker)) {
        score -= 3.0;
    }

    score.clamp(0.0, 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with(content: &str) -> ScrapedDocument {
        ScrapedDocument {
            url: "https://example.dev/a".into(),
            success: true,
            error: None,
            title: Some("Title".into()),
            description: None,
            content: content.to_string(),
            original_length: content.len(),
            headings: vec![],
            author: None,
            publisher: None,
            domain: Some("example.dev".into()),
            published_date: None,
            featured_image: None,
            links: vec![],
            quality_score: 0.0,
        }
    }

    #[test]
    fn score_is_always_in_range() {
        let short = doc_with("hi");
        assert!((0.0..=10.0).contains(&score(&short)));

        let long = "x".repeat(9000);
        let long_doc = doc_with(&long);
        assert!((0.0..=10.0).contains(&score(&long_doc)));
    }

    #[test]
    fn ideal_length_band_scores_higher_than_too_short() {
        let ideal = doc_with(&"professional experience career skills ".repeat(60));
        let too_short = doc_with("short");
        assert!(score(&ideal) > score(&too_short));
    }

    #[test]
    fn low_quality_marker_penalizes_heavily() {
        let mut doc = doc_with(&"a".repeat(1200));
        doc.content.push_str(" 404 error page not found");
        let baseline = doc_with(&"a".repeat(1200));
        assert!(score(&doc) < score(&baseline));
    }

    #[test]
    fn author_and_date_each_add_half_point() {
        let mut doc = doc_with(&"a".repeat(1200));
        let base = score(&doc);
        doc.author = Some("Jane Doe".into());
        doc.published_date = Some("2024-01-01".into());
        assert!((score(&doc) - base - 1.0).abs() < 1e-9);
    }

    #[test]
    fn keyword_bonus_is_capped() {
        let lots_of_keywords = PROFESSIONAL_KEYWORDS.join(" ").repeat(3);
        let doc = doc_with(&lots_of_keywords);
        let no_keywords = doc_with(&"x".repeat(lots_of_keywords.len()));
        assert!(score(&doc) - score(&no_keywords) <= 2.01);
    }
}
