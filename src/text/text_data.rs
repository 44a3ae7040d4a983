use tracing::debug;

use crate::autograd::Tensor;
use crate::error::{Error, Result};
use crate::text::embedding::{TextEmbedding, TrainableWordEmbedding};
use crate::text::processor::{
    apply_all, LowerCaseConvertor, PunctuationSeparator, SimpleTokenizer, TextProcessor,
};
use crate::text::vocabulary::{Vocabulary, VocabularyBuilder};

/// Tokens seen fewer times than this become the unknown token.
pub const MIN_FREQUENCY: usize = 3;
/// Always present in a [`TextData`] vocabulary.
pub const RESERVED_TOKENS: [&str; 3] = ["<pad>", "<bos>", "<eos>"];

/// Settings for a [`TextData`]. `None` fields keep the value they are merged
/// onto in [`TextDataConfig::update`].
#[derive(Default)]
pub struct TextDataConfig {
    pub processors: Option<Vec<Box<dyn TextProcessor>>>,
    pub embedding: Option<Box<dyn TextEmbedding>>,
    pub train_embedding: Option<bool>,
    pub embedding_size: Option<usize>,
}

impl TextDataConfig {
    /// Whitespace tokenizer, lower-casing and punctuation splitting;
    /// embedding size 15; no pre-built embedding.
    pub fn standard() -> Self {
        Self {
            processors: Some(vec![
                Box::new(SimpleTokenizer),
                Box::new(LowerCaseConvertor),
                Box::new(PunctuationSeparator),
            ]),
            embedding: None,
            train_embedding: Some(false),
            embedding_size: Some(15),
        }
    }

    pub fn with_processors(mut self, processors: Vec<Box<dyn TextProcessor>>) -> Self {
        self.processors = Some(processors);
        self
    }

    pub fn with_embedding(mut self, embedding: Box<dyn TextEmbedding>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_train_embedding(mut self, train: bool) -> Self {
        self.train_embedding = Some(train);
        self
    }

    pub fn with_embedding_size(mut self, size: usize) -> Self {
        self.embedding_size = Some(size);
        self
    }

    /// Takes every field `other` sets.
    pub fn update(mut self, other: TextDataConfig) -> Self {
        if other.processors.is_some() {
            self.processors = other.processors;
        }
        if other.embedding.is_some() {
            self.embedding = other.embedding;
        }
        self.train_embedding = other.train_embedding.or(self.train_embedding);
        self.embedding_size = other.embedding_size.or(self.embedding_size);
        self
    }
}

/// Tokenized text of a dataset plus the vocabulary and embedding built over it.
pub struct TextData {
    processors: Vec<Box<dyn TextProcessor>>,
    embedding: Option<Box<dyn TextEmbedding>>,
    train_embedding: bool,
    embedding_size: usize,
    vocabulary: Option<Vocabulary>,
    raw: Vec<Vec<String>>,
    text: Vec<Vec<String>>,
}

impl TextData {
    /// Fields `config` leaves unset come from [`TextDataConfig::standard`].
    pub fn new(config: TextDataConfig) -> Self {
        let config = TextDataConfig::standard().update(config);
        Self {
            processors: config.processors.unwrap_or_default(),
            embedding: config.embedding,
            train_embedding: config.train_embedding.unwrap_or(false),
            embedding_size: config.embedding_size.unwrap_or(15),
            vocabulary: None,
            raw: Vec::new(),
            text: Vec::new(),
        }
    }

    /// Tokenizes `new_text`, rebuilds the vocabulary over everything seen so
    /// far and replaces rare tokens with the unknown token.
    ///
    /// Counts accumulate across calls: the vocabulary is never built from
    /// `new_text` alone, and earlier sentences are re-masked against the
    /// rebuilt vocabulary, so a token masked by one call can be restored by a
    /// later one.
    ///
    /// Without an embedding, a [`TrainableWordEmbedding`] over the vocabulary
    /// is created and ids become the embedded form.
    pub fn preprocess<S: AsRef<str>>(&mut self, new_text: &[S]) {
        for datum in new_text {
            self.raw.push(apply_all(&self.processors, datum.as_ref()));
        }

        let mut builder = VocabularyBuilder::new()
            .min_frequency(MIN_FREQUENCY)
            .reserved_tokens(RESERVED_TOKENS);
        for tokens in &self.raw {
            builder.add(tokens);
        }
        let vocabulary = builder.build();

        self.text = self
            .raw
            .iter()
            .map(|tokens| {
                tokens
                    .iter()
                    .map(|t| {
                        if vocabulary.is_known(t) {
                            t.clone()
                        } else {
                            vocabulary.unknown_token().to_string()
                        }
                    })
                    .collect()
            })
            .collect();
        debug!(
            sentences = self.text.len(),
            vocabulary = vocabulary.len(),
            "preprocessed text"
        );

        if self.embedding.is_none() {
            self.embedding = Some(Box::new(TrainableWordEmbedding::new(
                vocabulary.clone(),
                self.embedding_size,
            )));
            self.train_embedding = true;
        }
        self.vocabulary = Some(vocabulary);
    }

    /// Sentence `index` as ids when the embedding is trained with the model,
    /// or as embedding vectors otherwise.
    pub fn embed_text(&self, index: usize) -> Result<Tensor> {
        let tokens = self.text.get(index).ok_or_else(|| {
            Error::invalid_argument(format!("text index {index} out of {}", self.text.len()))
        })?;
        let embedding = self
            .embedding
            .as_ref()
            .ok_or_else(|| Error::uninitialized("text embedding; call preprocess first"))?;
        if self.train_embedding {
            embedding.preprocess_text_to_embed(tokens)
        } else {
            embedding.embed_text(tokens)
        }
    }

    pub fn vocabulary(&self) -> Result<&Vocabulary> {
        self.vocabulary
            .as_ref()
            .ok_or_else(|| Error::uninitialized("vocabulary; call preprocess first"))
    }

    pub fn tokens(&self, index: usize) -> Option<&[String]> {
        self.text.get(index).map(Vec::as_slice)
    }

    pub fn embedding(&self) -> Option<&dyn TextEmbedding> {
        self.embedding.as_deref()
    }

    pub fn set_processors(&mut self, processors: Vec<Box<dyn TextProcessor>>) {
        self.processors = processors;
    }

    pub fn set_embedding(&mut self, embedding: Box<dyn TextEmbedding>) {
        self.embedding = Some(embedding);
    }

    pub fn set_train_embedding(&mut self, train: bool) {
        self.train_embedding = train;
    }

    pub fn set_embedding_size(&mut self, size: usize) {
        self.embedding_size = size;
    }

    pub fn is_train_embedding(&self) -> bool {
        self.train_embedding
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
