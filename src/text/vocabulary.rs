use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Counts tokens and turns them into a [`Vocabulary`].
#[derive(Debug, Clone)]
pub struct VocabularyBuilder {
    min_frequency: usize,
    max_tokens: Option<usize>,
    reserved_tokens: Vec<String>,
    unknown_token: String,
    counts: HashMap<String, usize>,
}

impl Default for VocabularyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VocabularyBuilder {
    /// Minimum frequency 1, no size cap, no reserved tokens, `"<unk>"`.
    pub fn new() -> Self {
        Self {
            min_frequency: 1,
            max_tokens: None,
            reserved_tokens: Vec::new(),
            unknown_token: "<unk>".to_string(),
            counts: HashMap::new(),
        }
    }

    pub fn min_frequency(mut self, min_frequency: usize) -> Self {
        self.min_frequency = min_frequency;
        self
    }

    /// Caps the number of counted tokens; reserved and unknown tokens are
    /// not included in the cap.
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn reserved_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved_tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    pub fn unknown_token(mut self, token: impl Into<String>) -> Self {
        self.unknown_token = token.into();
        self
    }

    pub fn add<I, S>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for token in tokens {
            *self.counts.entry(token.as_ref().to_owned()).or_default() += 1;
        }
    }

    /// Unknown token gets id 0, reserved tokens follow in the given order,
    /// then tokens meeting the minimum frequency by descending count, ties
    /// broken lexicographically.
    pub fn build(&self) -> Vocabulary {
        let mut tokens = vec![self.unknown_token.clone()];
        for reserved in &self.reserved_tokens {
            if !tokens.contains(reserved) {
                tokens.push(reserved.clone());
            }
        }

        let mut counted: Vec<(&String, usize)> = self
            .counts
            .iter()
            .filter(|(t, c)| **c >= self.min_frequency && !tokens.contains(*t))
            .map(|(t, &c)| (t, c))
            .collect();
        counted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        let cap = self.max_tokens.unwrap_or(usize::MAX);
        tokens.extend(counted.into_iter().take(cap).map(|(t, _)| t.clone()));

        Vocabulary::from_tokens(tokens)
    }
}

/// Bidirectional token/id mapping. Id 0 is the unknown token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    tokens: Vec<String>,
    index: HashMap<String, usize>,
}

impl From<Vec<String>> for Vocabulary {
    fn from(tokens: Vec<String>) -> Self {
        Self::from_tokens(tokens)
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocabulary: Vocabulary) -> Self {
        vocabulary.tokens
    }
}

impl Vocabulary {
    /// `tokens[0]` becomes the unknown token. An empty list yields `"<unk>"`.
    pub fn from_tokens(mut tokens: Vec<String>) -> Self {
        if tokens.is_empty() {
            tokens.push("<unk>".to_string());
        }
        let mut index = HashMap::with_capacity(tokens.len());
        for (i, t) in tokens.iter().enumerate() {
            index.entry(t.clone()).or_insert(i);
        }
        Self { tokens, index }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn unknown_token(&self) -> &str {
        &self.tokens[0]
    }

    pub fn unknown_id(&self) -> usize {
        0
    }

    pub fn is_known(&self, token: &str) -> bool {
        self.index.contains_key(token)
    }

    /// Id of `token`, or the unknown id.
    pub fn token_to_id(&self, token: &str) -> usize {
        self.index.get(token).copied().unwrap_or(0)
    }

    pub fn id_to_token(&self, id: usize) -> Option<&str> {
        self.tokens.get(id).map(String::as_str)
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_and_frequency_cutoff() {
        let mut b = VocabularyBuilder::new()
            .min_frequency(2)
            .reserved_tokens(["<pad>", "<bos>"]);
        b.add("b a c a b d b a".split(' '));
        let v = b.build();
        assert_eq!(v.tokens(), &["<unk>", "<pad>", "<bos>", "a", "b"]);
        assert_eq!(v.token_to_id("b"), 4);
        assert_eq!(v.token_to_id("c"), 0);
        assert!(!v.is_known("d"));
        assert_eq!(v.id_to_token(1), Some("<pad>"));
        assert_eq!(v.id_to_token(9), None);
    }

    #[test]
    fn reserved_tokens_survive_any_cutoff() {
        let mut b = VocabularyBuilder::new()
            .min_frequency(100)
            .max_tokens(0)
            .reserved_tokens(["<eos>"])
            .unknown_token("[UNK]");
        b.add(["x", "x", "<eos>"]);
        let v = b.build();
        assert_eq!(v.tokens(), &["[UNK]", "<eos>"]);
        assert_eq!(v.unknown_token(), "[UNK]");
    }

    #[test]
    fn max_tokens_keeps_most_frequent() {
        let mut b = VocabularyBuilder::new().max_tokens(1);
        b.add(["z", "y", "y"]);
        assert_eq!(b.build().tokens(), &["<unk>", "y"]);
    }

    #[test]
    fn serializes_as_token_list() {
        let v = Vocabulary::from_tokens(vec!["<unk>".into(), "hi".into()]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"["<unk>","hi"]"#);
        let back: Vocabulary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
