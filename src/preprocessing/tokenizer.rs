//! Tokenizers and vocabularies for token based features

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const UNKNOWN_TOKEN: &str = "<UNK>";

/// How a cell is split into tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tokenizer {
    /// Split on whitespace, keep tokens as written
    Space,
    /// Lowercase and split on anything that is not alphanumeric
    Words,
}

impl Tokenizer {
    pub fn tokenize<'a>(&self, text: &'a str) -> Vec<std::borrow::Cow<'a, str>> {
        match self {
            Tokenizer::Space => text
                .split_whitespace()
                .map(std::borrow::Cow::Borrowed)
                .collect(),
            Tokenizer::Words => text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|s| !s.is_empty())
                .map(|s| std::borrow::Cow::Owned(s.to_lowercase()))
                .collect(),
        }
    }
}

/// Token to index mapping; index 0 is reserved for unknown tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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
    fn from(vocab: Vocabulary) -> Self {
        vocab.tokens
    }
}

impl Vocabulary {
    /// Keep the `max_tokens` most frequent tokens, ties broken alphabetically
    pub fn build<I, S>(tokens: I, max_tokens: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for token in tokens {
            *counts.entry(token.as_ref().to_string()).or_insert(0) += 1;
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(max_tokens);

        let mut tokens = Vec::with_capacity(ranked.len() + 1);
        tokens.push(UNKNOWN_TOKEN.to_string());
        tokens.extend(ranked.into_iter().map(|(t, _)| t));
        Self::from_tokens(tokens)
    }

    fn from_tokens(tokens: Vec<String>) -> Self {
        let index = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        Self { tokens, index }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Index of `token`, or 0 when it is unknown
    pub fn index_of(&self, token: &str) -> usize {
        self.index.get(token).copied().unwrap_or(0)
    }

    pub fn token(&self, index: usize) -> Option<&str> {
        self.tokens.get(index).map(|s| s.as_str())
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_space_tokenizer_keeps_case() {
        let tokens = Tokenizer::Space.tokenize("Foo  bar\tBaz");
        assert_eq!(tokens, vec!["Foo", "bar", "Baz"]);
    }

    #[test]
    fn test_words_tokenizer_normalizes() {
        let tokens = Tokenizer::Words.tokenize("Hello, World! hello");
        assert_eq!(tokens, vec!["hello", "world", "hello"]);
    }

    #[test]
    fn test_vocabulary_ranking_and_cap() {
        let vocab = Vocabulary::build(["b", "a", "b", "c", "a", "b", "d"], 2);
        assert_eq!(vocab.tokens(), &["<UNK>", "b", "a"]);
        assert_eq!(vocab.index_of("b"), 1);
        assert_eq!(vocab.index_of("d"), 0);
    }

    #[test]
    fn test_vocabulary_survives_serde() {
        let vocab = Vocabulary::build(["x", "y", "x"], 10);
        let json = serde_json::to_string(&vocab).unwrap();
        assert_eq!(json, r#"["<UNK>","x","y"]"#);
        let restored: Vocabulary = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.index_of("x"), 1);
        assert_eq!(restored, vocab);
    }
}
