//! Text preprocessing: token processors, vocabularies and word embeddings.

pub mod embedding;
pub mod processor;
pub mod text_data;
pub mod vocabulary;

pub use embedding::{TextEmbedding, TrainableWordEmbedding, MAX_EXACT_ID};
pub use processor::{
    LowerCaseConvertor, PunctuationSeparator, SimpleTokenizer, TextProcessor, TextTerminator,
};
pub use text_data::{TextData, TextDataConfig};
pub use vocabulary::{Vocabulary, VocabularyBuilder};
