//! Comma-separated parameter parsing and case-insensitive term matching.

/// Split a comma-separated parameter into trimmed, non-empty parts.
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Terms from `text`, keeping configured order, that occur in it ignoring case.
pub fn match_terms(text: &str, terms: &[String]) -> Vec<String> {
    if terms.is_empty() {
        return Vec::new();
    }
    let haystack = text.to_lowercase();
    terms
        .iter()
        .filter(|t| haystack.contains(&t.to_lowercase()))
        .cloned()
        .collect()
}

/// Search terms for one request or live connection. Empty means no filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermSet {
    terms: Vec<String>,
}

impl TermSet {
    /// Parse the optional `q` parameter.
    pub fn parse(q: Option<&str>) -> Self {
        Self {
            terms: q.map(split_csv).unwrap_or_default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Decide whether `text` passes. `None` excludes it; `Some(matched)` includes it, with
    /// `matched` empty when no terms are configured.
    pub fn filter(&self, text: &str) -> Option<Vec<String>> {
        if self.terms.is_empty() {
            return Some(Vec::new());
        }
        let hit = match_terms(text, &self.terms);
        if hit.is_empty() {
            None
        } else {
            Some(hit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(ts: &[&str]) -> Vec<String> {
        ts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn split_csv_trims_and_drops_empty() {
        assert_eq!(split_csv(" @a, ,@b ,"), vec!["@a", "@b"]);
        assert!(split_csv("").is_empty());
        assert!(split_csv(" , ").is_empty());
    }

    #[test]
    fn matching_is_case_insensitive_and_keeps_term_order() {
        let t = terms(&["TSLA", "elon", "SpaceX"]);
        assert_eq!(
            match_terms("spacex and Elon Musk", &t),
            vec!["elon".to_string(), "SpaceX".to_string()]
        );
        assert!(match_terms("nothing here", &t).is_empty());
    }

    #[test]
    fn matching_is_pure() {
        let t = terms(&["elon"]);
        let first = match_terms("Elon tweets", &t);
        let second = match_terms("Elon tweets", &t);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_term_set_passes_everything_with_no_matches() {
        let set = TermSet::parse(None);
        assert!(set.is_empty());
        assert_eq!(set.filter("anything"), Some(Vec::new()));
        assert!(TermSet::parse(Some(" , ")).is_empty());
    }

    #[test]
    fn configured_terms_exclude_non_matching_text() {
        let set = TermSet::parse(Some("Elon, TSLA"));
        assert_eq!(set.terms(), &["Elon".to_string(), "TSLA".to_string()]);
        assert_eq!(set.filter("elon spoke"), Some(vec!["Elon".to_string()]));
        assert_eq!(set.filter("weather report"), None);
    }
}
