//! Token-list transformations applied before vocabulary building.

/// Turns one token list into another. Processors are chained, so a
/// tokenizer sees the raw sentence as a single-element list.
pub trait TextProcessor {
    fn preprocess(&self, tokens: Vec<String>) -> Vec<String>;
}

/// Splits every token on whitespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTokenizer;

impl TextProcessor for SimpleTokenizer {
    fn preprocess(&self, tokens: Vec<String>) -> Vec<String> {
        tokens
            .iter()
            .flat_map(|t| t.split_whitespace().map(str::to_owned))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LowerCaseConvertor;

impl TextProcessor for LowerCaseConvertor {
    fn preprocess(&self, tokens: Vec<String>) -> Vec<String> {
        tokens.into_iter().map(|t| t.to_lowercase()).collect()
    }
}

/// Splits ASCII punctuation off into tokens of its own: `"end."` becomes
/// `"end"`, `"."`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PunctuationSeparator;

impl TextProcessor for PunctuationSeparator {
    fn preprocess(&self, tokens: Vec<String>) -> Vec<String> {
        let mut out = Vec::with_capacity(tokens.len());
        for token in tokens {
            let mut word = String::new();
            for ch in token.chars() {
                if ch.is_ascii_punctuation() {
                    if !word.is_empty() {
                        out.push(std::mem::take(&mut word));
                    }
                    out.push(ch.to_string());
                } else if ch.is_whitespace() {
                    if !word.is_empty() {
                        out.push(std::mem::take(&mut word));
                    }
                } else {
                    word.push(ch);
                }
            }
            if !word.is_empty() {
                out.push(word);
            }
        }
        out
    }
}

/// Wraps a sentence in begin/end markers.
#[derive(Debug, Clone)]
pub struct TextTerminator {
    bos: Option<String>,
    eos: Option<String>,
}

impl Default for TextTerminator {
    fn default() -> Self {
        Self::new("<bos>", "<eos>")
    }
}

impl TextTerminator {
    pub fn new(bos: impl Into<String>, eos: impl Into<String>) -> Self {
        Self {
            bos: Some(bos.into()),
            eos: Some(eos.into()),
        }
    }

    /// Only appends the end marker.
    pub fn eos_only(eos: impl Into<String>) -> Self {
        Self {
            bos: None,
            eos: Some(eos.into()),
        }
    }
}

impl TextProcessor for TextTerminator {
    fn preprocess(&self, tokens: Vec<String>) -> Vec<String> {
        self.bos
            .iter()
            .cloned()
            .chain(tokens)
            .chain(self.eos.iter().cloned())
            .collect()
    }
}

/// Runs `processors` in order over a single raw sentence.
pub fn apply_all(processors: &[Box<dyn TextProcessor>], text: &str) -> Vec<String> {
    processors
        .iter()
        .fold(vec![text.to_string()], |tokens, p| p.preprocess(tokens))
}
