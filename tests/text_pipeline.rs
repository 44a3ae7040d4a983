use ndblocks::text::{
    LowerCaseConvertor, PunctuationSeparator, SimpleTokenizer, TextData, TextDataConfig,
    TextEmbedding, TextProcessor, TextTerminator, TrainableWordEmbedding,
};
use ndblocks::{Initializer, Model, Shape, Trainer, TrainingConfig};

const CORPUS: [&str; 4] = [
    "The quick fox.",
    "the lazy dog sleeps!",
    "THE FOX, the dog.",
    "A fox and the dog.",
];

#[test]
fn preprocessing_builds_vocabulary_with_reserved_tokens() {
    let processors: Vec<Box<dyn TextProcessor>> = vec![
        Box::new(SimpleTokenizer),
        Box::new(LowerCaseConvertor),
        Box::new(PunctuationSeparator),
        Box::new(TextTerminator::default()),
    ];
    let mut data = TextData::new(TextDataConfig::default().with_processors(processors));
    data.preprocess(&CORPUS);
    assert_eq!(data.len(), 4);

    let vocab = data.vocabulary().unwrap();
    for reserved in ["<unk>", "<pad>", "<bos>", "<eos>"] {
        assert!(vocab.is_known(reserved));
    }
    // the: 5, fox: 3, dog: 3, ".": 3
    for frequent in ["the", "fox", "dog", "."] {
        assert!(vocab.is_known(frequent), "{frequent}");
    }
    for rare in ["quick", "lazy", "sleeps", "a", "and", "!", ","] {
        assert!(!vocab.is_known(rare), "{rare}");
        assert_eq!(vocab.token_to_id(rare), vocab.unknown_id());
    }
    assert_eq!(
        data.tokens(1).unwrap(),
        &["<bos>", "the", "<unk>", "dog", "<unk>", "<unk>", "<eos>"]
    );
}

#[test]
fn later_text_extends_the_vocabulary() {
    let mut data = TextData::new(TextDataConfig::default());
    data.preprocess(&CORPUS[..2]);
    assert!(!data.vocabulary().unwrap().is_known("dog"));
    data.preprocess(&CORPUS[2..]);
    assert!(data.vocabulary().unwrap().is_known("dog"));
    assert_eq!(data.len(), 4);
}

#[test]
fn word_embedding_trains_inside_a_model() {
    let mut data = TextData::new(TextDataConfig::default().with_embedding_size(4));
    data.preprocess(&CORPUS);
    let ids = data.embed_text(3).unwrap();
    assert_eq!(ids.shape(), vec![6]);

    let embedding = TrainableWordEmbedding::new(data.vocabulary().unwrap().clone(), 4);
    let handle = embedding.clone();
    let mut model = Model::new("words", embedding);
    let mut trainer = Trainer::new(&mut model, TrainingConfig::new(Initializer::Ones)).unwrap();
    let shapes = trainer.initialize(&[Shape::new(&[6])]).unwrap();
    assert!(shapes[0].matches(&[6, 4]));

    let out = trainer.forward(&[ids.clone()]).unwrap();
    assert_eq!(out[0].shape(), vec![6, 4]);
    let direct = handle.embed_text(data.tokens(3).unwrap()).unwrap();
    assert_eq!(direct.to_vec(), out[0].to_vec());

    assert_eq!(
        handle.unembed_text(&ids).unwrap(),
        data.tokens(3).unwrap().to_vec()
    );
}
