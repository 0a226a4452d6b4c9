use tantivy::tokenizer::{
    Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, StopWordFilter, TextAnalyzer, TokenStream,
};

/// Tokens longer than this (in bytes) are dropped before lower-casing.
pub const MAX_TOKEN_LEN: usize = 40;

pub const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it", "its", "of", "on",
    "that", "the", "to", "was", "will", "with", "or", "but", "not", "this", "these", "they", "them", "their", "there",
    "then", "than", "so", "if", "when", "where", "why", "how", "what", "which", "who", "whom", "whose", "can", "could",
    "should", "would", "may", "might", "must", "shall", "do", "does", "did", "have", "had", "having",
];

/// The one analyzer used for both indexing and querying.
///
/// Pipeline: split on non-alphanumerics, drop tokens over [`MAX_TOKEN_LEN`]
/// bytes, lower-case, remove [`STOP_WORDS`], English Snowball stemming.
#[derive(Clone)]
pub struct Analyzer {
    inner: TextAnalyzer,
}

impl Default for Analyzer {
    fn default() -> Self { Self::new() }
}

impl Analyzer {
    pub fn new() -> Self {
        let inner = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
            .filter(LowerCaser)
            .filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| (*s).to_string())))
            .filter(Stemmer::new(Language::English))
            .build();
        Self { inner }
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        // `token_stream` needs a mutable analyzer; the clone is a boxed pipeline.
        let mut analyzer = self.inner.clone();
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        tokens
    }
}
