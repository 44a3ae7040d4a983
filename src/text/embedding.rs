use crate::autograd::Tensor;
use crate::block::{single_input, Block, BlockCore};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::layers::Embedding;
use crate::shape::Shape;
use crate::text::vocabulary::Vocabulary;

/// Largest vocabulary whose ids all survive the round trip through `f32`.
pub const MAX_EXACT_ID: usize = 1 << 24;

/// Maps token sequences to tensors and back.
///
/// Ids travel as `f32` tensors, which hold whole numbers exactly only up to
/// [`MAX_EXACT_ID`]; larger ids would collide, so bigger vocabularies are
/// rejected.
pub trait TextEmbedding {
    /// Ids of `tokens` as an `f32` tensor of shape `[len]`, ready to feed an
    /// embedding block. Unknown tokens map to the unknown id.
    fn preprocess_text_to_embed(&self, tokens: &[String]) -> Result<Tensor>;

    /// Embedding vectors of `tokens`, shape `[len, embedding_size]`.
    fn embed_text(&self, tokens: &[String]) -> Result<Tensor>;

    /// Tokens for a tensor of ids.
    fn unembed_text(&self, ids: &Tensor) -> Result<Vec<String>>;
}

/// Word-level embedding learned together with a model.
///
/// A [`Block`] over id tensors, owning one `weight` of shape
/// `[vocabulary size, embedding_size]`. Clones share the weight.
#[derive(Clone)]
pub struct TrainableWordEmbedding {
    core: BlockCore,
    vocabulary: Vocabulary,
    embedding: Embedding,
}

impl TrainableWordEmbedding {
    pub fn new(vocabulary: Vocabulary, embedding_size: usize) -> Self {
        let embedding = Embedding::new(vocabulary.len(), embedding_size);
        let mut core = BlockCore::new("word_embedding");
        core.push_parameter(embedding.weight().clone());
        Self {
            core,
            vocabulary,
            embedding,
        }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn embedding_size(&self) -> usize {
        self.embedding.embedding_size()
    }
}

impl TextEmbedding for TrainableWordEmbedding {
    fn preprocess_text_to_embed(&self, tokens: &[String]) -> Result<Tensor> {
        check_exact_ids(self.vocabulary.len())?;
        let ids = tokens
            .iter()
            .map(|t| self.vocabulary.token_to_id(t) as f32)
            .collect();
        Tensor::from_vec(&[tokens.len()], ids)
    }

    fn embed_text(&self, tokens: &[String]) -> Result<Tensor> {
        self.embedding.embed(&self.preprocess_text_to_embed(tokens)?)
    }

    fn unembed_text(&self, ids: &Tensor) -> Result<Vec<String>> {
        ids.to_vec()
            .into_iter()
            .map(|id| {
                let token = (id >= 0.0 && id.fract() == 0.0)
                    .then(|| self.vocabulary.id_to_token(id as usize))
                    .flatten();
                token.map(str::to_owned).ok_or_else(|| {
                    Error::invalid_argument(format!(
                        "id {id} outside vocabulary of {}",
                        self.vocabulary.len()
                    ))
                })
            })
            .collect()
    }
}

fn check_exact_ids(vocabulary_size: usize) -> Result<()> {
    if vocabulary_size > MAX_EXACT_ID {
        return Err(Error::invalid_argument(format!(
            "vocabulary of {vocabulary_size} tokens exceeds {MAX_EXACT_ID} exact f32 ids"
        )));
    }
    Ok(())
}

impl Block for TrainableWordEmbedding {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn forward(&self, ctx: &mut Context, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        self.embedding
            .forward(ctx, std::slice::from_ref(single_input(inputs, "word_embedding")?))
    }

    fn output_shapes(&self, inputs: &[Shape]) -> Result<Vec<Shape>> {
        self.embedding.output_shapes(inputs)
    }

    fn parameter_shape(&self, name: &str, inputs: &[Shape]) -> Result<Vec<usize>> {
        self.embedding.parameter_shape(name, inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::Initializer;

    fn vocab() -> Vocabulary {
        Vocabulary::from_tokens(["<unk>", "the", "cat"].map(String::from).to_vec())
    }

    fn tokens(s: &str) -> Vec<String> {
        s.split(' ').map(String::from).collect()
    }

    #[test]
    fn ids_and_back() {
        let e = TrainableWordEmbedding::new(vocab(), 4);
        let ids = e.preprocess_text_to_embed(&tokens("the dog cat")).unwrap();
        assert_eq!(ids.to_vec(), vec![1.0, 0.0, 2.0]);
        assert_eq!(e.unembed_text(&ids).unwrap(), tokens("the <unk> cat"));
        assert!(e.unembed_text(&Tensor::scalar(7.0)).is_err());
    }

    #[test]
    fn ids_stay_exact_up_to_the_limit() {
        let last = (MAX_EXACT_ID - 1) as f32;
        assert_eq!(last as usize, MAX_EXACT_ID - 1);
        assert_eq!((MAX_EXACT_ID + 1) as f32, MAX_EXACT_ID as f32);
        assert!(check_exact_ids(MAX_EXACT_ID).is_ok());
        assert!(matches!(
            check_exact_ids(MAX_EXACT_ID + 1),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn embedding_needs_initialization() {
        let mut ctx = Context::seeded(0);
        let e = TrainableWordEmbedding::new(vocab(), 2);
        assert!(matches!(
            e.embed_text(&tokens("cat")),
            Err(Error::Uninitialized(_))
        ));
        e.initialize(&mut ctx, &Initializer::Ones, &[Shape::new(&[3])])
            .unwrap();
        assert_eq!(e.parameters().keys(), &["weight"]);
        let v = e.embed_text(&tokens("cat the")).unwrap();
        assert_eq!(v.shape(), vec![2, 2]);
        assert_eq!(v.to_vec(), vec![1.0; 4]);
    }
}
