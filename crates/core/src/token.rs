use serde::{Deserialize, Serialize};

/// One OCR-detected text region.
///
/// `sequence_index` is the position the token source reported the region at,
/// counted before any filtering. It is never renumbered downstream, so gaps in
/// a filtered list show where low-confidence tokens were dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "TokenFields")]
pub struct Token {
    pub text: String,
    /// Recognition confidence (0.0–1.0).
    pub confidence: f32,
    pub sequence_index: usize,
}

/// Deserialized tokens go through [`Token::new`], so a saved artifact cannot
/// bring back untrimmed text or an out-of-range confidence.
#[derive(Deserialize)]
struct TokenFields {
    text: String,
    confidence: f32,
    sequence_index: usize,
}

impl From<TokenFields> for Token {
    fn from(f: TokenFields) -> Self {
        Token::new(f.sequence_index, f.text, f.confidence)
    }
}

impl Token {
    pub fn new(sequence_index: usize, text: impl AsRef<str>, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
        Self {
            text: text.as_ref().trim().to_string(),
            confidence,
            sequence_index,
        }
    }

    /// Upper-cased text with whitespace runs collapsed, used for trigger matching.
    pub fn normalized(&self) -> String {
        self.text.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
    }

    /// True when the text is non-empty and made only of ASCII digits.
    pub fn is_numeric(&self) -> bool {
        !self.text.is_empty() && self.text.bytes().all(|b| b.is_ascii_digit())
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}
