//! Lightweight text normalization shared by the classifier and selector rules

/// Pre-computed views over a task's text for keyword matching
#[derive(Debug, Clone)]
pub struct TextFeatures {
    /// Lowercased text with whitespace collapsed, punctuation kept
    collapsed: String,
    /// Lowercased alphanumeric tokens (hyphens kept inside words)
    tokens: Vec<String>,
    /// Tokens joined by single spaces and padded, for phrase matching
    padded: String,
}

impl TextFeatures {
    pub fn new(text: &str) -> Self {
        let lower = text.to_lowercase();
        let collapsed = lower.split_whitespace().collect::<Vec<_>>().join(" ");

        let tokens: Vec<String> = lower
            .split(|c: char| !(c.is_alphanumeric() || c == '-'))
            .map(|t| t.trim_matches('-'))
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        let padded = format!(" {} ", tokens.join(" "));

        Self {
            collapsed,
            tokens,
            padded,
        }
    }

    /// True when the text had no visible content
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Character length of the collapsed text
    pub fn char_len(&self) -> usize {
        self.collapsed.chars().count()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Keyword match.
    ///
    /// Single words match any token starting with the keyword, so
    /// "refactor" also matches "refactoring". Phrases match on token
    /// boundaries.
    pub fn mentions(&self, keyword: &str) -> bool {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return false;
        }

        let words: Vec<&str> = keyword.split_whitespace().collect();
        if words.len() == 1 {
            self.tokens.iter().any(|t| t.starts_with(words[0]))
        } else {
            self.padded.contains(&format!(" {} ", words.join(" ")))
        }
    }

    /// Count non-overlapping occurrences of a raw marker such as " and " or ", "
    pub fn count_marker(&self, marker: &str) -> usize {
        if marker.is_empty() {
            return 0;
        }
        let haystack = format!(" {} ", self.collapsed);
        haystack.matches(&marker.to_lowercase()).count()
    }
}
