//! WordPiece tokenizer
//!
//! Deterministic text-to-id encoding compatible with BERT-family vocabularies.
//! Construction reads three sidecar files next to the model: the vocabulary
//! list (`vocab.txt`), tokenizer settings (`tokenizer_config.json`), and
//! WordPiece model metadata (`wordpiece.json`). The tokenizer is immutable
//! after construction and safe to share across threads.

use crate::error::RagError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use unicode_categories::UnicodeCategories;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// CJK Unicode blocks whose codepoints are isolated into single pre-tokens.
const CJK_BLOCKS: [(u32, u32); 8] = [
    (0x4E00, 0x9FFF),
    (0x3400, 0x4DBF),
    (0x20000, 0x2A6DF),
    (0x2A700, 0x2B73F),
    (0x2B740, 0x2B81F),
    (0x2B820, 0x2CEAF),
    (0xF900, 0xFAFF),
    (0x2F800, 0x2FA1F),
];

/// Tokenizer settings sidecar (`tokenizer_config.json`).
#[derive(Debug, Deserialize)]
struct TokenizerSettings {
    #[serde(default = "default_true")]
    do_lower_case: bool,
    /// When absent, accent stripping follows the lowercase flag.
    #[serde(default)]
    strip_accents: Option<bool>,
    #[serde(default = "default_true")]
    tokenize_chinese_chars: bool,
    #[serde(default = "default_max_length")]
    model_max_length: usize,
    #[serde(default = "default_cls")]
    cls_token: String,
    #[serde(default = "default_sep")]
    sep_token: String,
    #[serde(default = "default_pad")]
    pad_token: String,
    #[serde(default = "default_unk")]
    unk_token: String,
    #[serde(default)]
    pad_token_type_id: i64,
}

/// WordPiece model metadata sidecar (`wordpiece.json`).
#[derive(Debug, Deserialize, Default)]
struct WordPieceSettings {
    #[serde(default = "default_subword_prefix")]
    continuing_subword_prefix: String,
    #[serde(default = "default_max_word_chars")]
    max_input_chars_per_word: usize,
}

fn default_true() -> bool {
    true
}
fn default_max_length() -> usize {
    512
}
fn default_cls() -> String {
    "[CLS]".to_string()
}
fn default_sep() -> String {
    "[SEP]".to_string()
}
fn default_pad() -> String {
    "[PAD]".to_string()
}
fn default_unk() -> String {
    "[UNK]".to_string()
}
fn default_subword_prefix() -> String {
    "##".to_string()
}
fn default_max_word_chars() -> usize {
    100
}

/// Fixed-length encoding of one or two text segments.
///
/// All three arrays are exactly `max_seq_len` long; positions at or past
/// `effective_len` carry the pad token with attention mask 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
    pub effective_len: usize,
}

/// WordPiece tokenizer with BERT normalization semantics.
pub struct WordPieceTokenizer {
    vocab: HashMap<String, i64>,
    inverse: HashMap<i64, String>,
    cls_id: i64,
    sep_id: i64,
    pad_id: i64,
    unk_id: i64,
    do_lower_case: bool,
    strip_accents: bool,
    tokenize_chinese_chars: bool,
    max_seq_len: usize,
    pad_token_type_id: i64,
    subword_prefix: String,
    max_input_chars_per_word: usize,
}

impl std::fmt::Debug for WordPieceTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordPieceTokenizer")
            .field("vocab_size", &self.vocab.len())
            .finish()
    }
}

impl WordPieceTokenizer {
    /// Load a tokenizer from its sidecar files in `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let vocab_path = dir.join("vocab.txt");
        let settings_path = dir.join("tokenizer_config.json");
        let wordpiece_path = dir.join("wordpiece.json");

        let vocab_raw = std::fs::read_to_string(&vocab_path).map_err(|e| {
            RagError::Resource(format!("vocabulary file {:?} unreadable: {}", vocab_path, e))
        })?;
        let settings_raw = std::fs::read_to_string(&settings_path).map_err(|e| {
            RagError::Resource(format!(
                "tokenizer settings {:?} unreadable: {}",
                settings_path, e
            ))
        })?;
        let wordpiece_raw = std::fs::read_to_string(&wordpiece_path).map_err(|e| {
            RagError::Resource(format!(
                "wordpiece metadata {:?} unreadable: {}",
                wordpiece_path, e
            ))
        })?;

        let settings: TokenizerSettings = serde_json::from_str(&settings_raw)
            .context("Failed to parse tokenizer_config.json")?;
        let wordpiece: WordPieceSettings =
            serde_json::from_str(&wordpiece_raw).context("Failed to parse wordpiece.json")?;

        if settings.model_max_length < 2 {
            return Err(RagError::Config(format!(
                "model_max_length must be at least 2, got {}",
                settings.model_max_length
            ))
            .into());
        }

        let mut vocab = HashMap::new();
        let mut inverse = HashMap::new();
        for (index, line) in vocab_raw.lines().enumerate() {
            let token = line.trim_end_matches(['\r', '\n']);
            if token.is_empty() {
                continue;
            }
            let id = index as i64;
            vocab.insert(token.to_string(), id);
            inverse.insert(id, token.to_string());
        }

        let special = |token: &str| -> Result<i64> {
            vocab.get(token).copied().ok_or_else(|| {
                RagError::DataIntegrity(format!("vocabulary is missing required token {}", token))
                    .into()
            })
        };
        let cls_id = special(&settings.cls_token)?;
        let sep_id = special(&settings.sep_token)?;
        let pad_id = special(&settings.pad_token)?;
        let unk_id = special(&settings.unk_token)?;

        tracing::debug!(
            "Loaded WordPiece tokenizer: {} tokens, max_seq_len {}",
            vocab.len(),
            settings.model_max_length
        );

        Ok(Self {
            strip_accents: settings.strip_accents.unwrap_or(settings.do_lower_case),
            vocab,
            inverse,
            cls_id,
            sep_id,
            pad_id,
            unk_id,
            do_lower_case: settings.do_lower_case,
            tokenize_chinese_chars: settings.tokenize_chinese_chars,
            max_seq_len: settings.model_max_length,
            pad_token_type_id: settings.pad_token_type_id,
            subword_prefix: wordpiece.continuing_subword_prefix,
            max_input_chars_per_word: wordpiece.max_input_chars_per_word,
        })
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Encode a single text segment.
    pub fn encode(&self, text: &str) -> Encoding {
        let ids = self.text_to_ids(text);
        self.assemble(ids, None)
    }

    /// Encode a text pair; token type ids distinguish the segments.
    pub fn encode_pair(&self, primary: &str, secondary: &str) -> Encoding {
        let a = self.text_to_ids(primary);
        if self.max_seq_len < 3 {
            // No room for a second segment and its separator.
            return self.assemble(a, None);
        }
        let b = self.text_to_ids(secondary);
        self.assemble(a, Some(b))
    }

    /// Map ids back to text, skipping special tokens and merging subwords.
    pub fn decode(&self, ids: &[i64]) -> String {
        let mut out = String::new();
        for &id in ids {
            if id == self.cls_id || id == self.sep_id || id == self.pad_id {
                continue;
            }
            let Some(token) = self.inverse.get(&id) else {
                continue;
            };
            if let Some(rest) = token.strip_prefix(&self.subword_prefix) {
                out.push_str(rest);
            } else {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(token);
            }
        }
        out
    }

    fn text_to_ids(&self, text: &str) -> Vec<i64> {
        let mut ids = Vec::new();
        for token in self.basic_tokenize(text) {
            self.wordpiece(&token, &mut ids);
        }
        ids
    }

    /// Clean, isolate CJK, split on whitespace and punctuation.
    fn basic_tokenize(&self, text: &str) -> Vec<String> {
        let cleaned = self.clean_text(text);
        let cleaned = if self.tokenize_chinese_chars {
            isolate_cjk(&cleaned)
        } else {
            cleaned
        };

        let mut tokens = Vec::new();
        for pre_token in cleaned.split(' ') {
            if pre_token.is_empty() {
                continue;
            }
            let mut word = pre_token.to_string();
            if self.do_lower_case {
                word = word.to_lowercase();
            }
            if self.strip_accents {
                word = word.nfd().filter(|c| !is_combining_mark(*c)).collect();
            }
            self.split_on_punctuation(&word, &mut tokens);
        }
        tokens
    }

    /// Drop NUL, the replacement character, and control characters; map all
    /// whitespace to ASCII space.
    fn clean_text(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            if c == '\0' || c == '\u{FFFD}' {
                continue;
            }
            if c.is_control() && !matches!(c, '\t' | '\n' | '\r') {
                continue;
            }
            if c.is_whitespace() {
                out.push(' ');
            } else {
                out.push(c);
            }
        }
        out
    }

    fn split_on_punctuation(&self, word: &str, out: &mut Vec<String>) {
        let mut current = String::new();
        for c in word.chars() {
            if is_punctuation(c) {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
                out.push(c.to_string());
            } else {
                current.push(c);
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
    }

    /// Greedy longest-match against the vocabulary.
    fn wordpiece(&self, token: &str, out: &mut Vec<i64>) {
        let chars: Vec<char> = token.chars().collect();
        if chars.len() > self.max_input_chars_per_word {
            out.push(self.unk_id);
            return;
        }

        let mut pieces = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let mut end = chars.len();
            let mut matched = None;
            while start < end {
                let mut candidate: String = chars[start..end].iter().collect();
                if start > 0 {
                    candidate = format!("{}{}", self.subword_prefix, candidate);
                }
                if let Some(&id) = self.vocab.get(&candidate) {
                    matched = Some(id);
                    break;
                }
                end -= 1;
            }
            match matched {
                Some(id) => {
                    pieces.push(id);
                    start = end;
                }
                None => {
                    // No prefix match: the whole word collapses to [UNK].
                    out.push(self.unk_id);
                    return;
                }
            }
        }
        out.extend(pieces);
    }

    /// Truncate, wrap with special tokens, and pad to `max_seq_len`.
    fn assemble(&self, mut primary: Vec<i64>, secondary: Option<Vec<i64>>) -> Encoding {
        let paired = secondary.is_some();
        let mut secondary = secondary.unwrap_or_default();
        let reserved = if paired { 3 } else { 2 };
        let budget = self.max_seq_len.saturating_sub(reserved);

        // Trim the longer segment one token at a time, primary on ties.
        while primary.len() + secondary.len() > budget {
            if primary.len() >= secondary.len() {
                primary.pop();
            } else {
                secondary.pop();
            }
        }

        let mut input_ids = Vec::with_capacity(self.max_seq_len);
        let mut token_type_ids = Vec::with_capacity(self.max_seq_len);

        input_ids.push(self.cls_id);
        token_type_ids.push(0);
        for id in primary {
            input_ids.push(id);
            token_type_ids.push(0);
        }
        input_ids.push(self.sep_id);
        token_type_ids.push(0);

        if paired {
            for id in secondary.drain(..) {
                input_ids.push(id);
                token_type_ids.push(1);
            }
            input_ids.push(self.sep_id);
            token_type_ids.push(1);
        }

        let effective_len = input_ids.len();
        let mut attention_mask = vec![1i64; effective_len];

        while input_ids.len() < self.max_seq_len {
            input_ids.push(self.pad_id);
            attention_mask.push(0);
            token_type_ids.push(self.pad_token_type_id);
        }

        Encoding {
            input_ids,
            attention_mask,
            token_type_ids,
            effective_len,
        }
    }
}

fn is_cjk(c: char) -> bool {
    let cp = c as u32;
    CJK_BLOCKS.iter().any(|&(lo, hi)| cp >= lo && cp <= hi)
}

/// Surround each CJK codepoint with spaces so it becomes its own pre-token.
fn isolate_cjk(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if is_cjk(c) {
            out.push(' ');
            out.push(c);
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

/// Punctuation per the WordPiece contract: the ASCII symbol ranges plus
/// every Unicode punctuation category.
fn is_punctuation(c: char) -> bool {
    let cp = c as u32;
    if (33..=47).contains(&cp)
        || (58..=64).contains(&cp)
        || (91..=96).contains(&cp)
        || (123..=126).contains(&cp)
    {
        return true;
    }
    c.is_punctuation()
}
