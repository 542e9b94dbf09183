//! Masked-word substitution applied to inbound descriptors.
//!
//! The dashboard never holds real credentials. It sends placeholders such as
//! `BINANCE_API_KEY_MASKED` and the proxy swaps them for the configured
//! secret before the descriptor is validated and forwarded.

use std::fmt;

use serde_json::{Map, Value};

#[derive(Clone, Default)]
pub struct SecretMap {
    entries: Vec<(String, String)>,
}

// 只打印被遮蔽的词，不打印密钥本身
impl fmt::Debug for SecretMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(word, _)| word))
            .finish()
    }
}

impl SecretMap {
    /// Pairs of `(masked word, secret)`. Entries with an empty word or
    /// empty secret are dropped.
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            entries: entries
                .into_iter()
                .filter(|(word, secret)| !word.is_empty() && !secret.is_empty())
                .collect(),
        }
    }

    /// Parses `WORD=ENV_VAR,WORD2=ENV_VAR2`, resolving each env var name
    /// through `lookup`. Malformed pairs and unresolved names are skipped.
    pub fn from_masks<F>(masks: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let entries = masks
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .filter_map(|(word, var)| {
                let secret = lookup(var.trim())?;
                Some((word.trim().to_string(), secret))
            });
        Self::new(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Replaces masked words in every string value, recursing through
    /// arrays and objects. Object keys are left alone.
    pub fn apply(&self, value: Value) -> Value {
        if self.is_empty() {
            return value;
        }
        match value {
            Value::String(s) => Value::String(self.replace_in_str(&s)),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.apply(v)).collect()),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.apply(v)))
                    .collect::<Map<String, Value>>(),
            ),
            other => other,
        }
    }

    fn replace_in_str(&self, s: &str) -> String {
        self.entries
            .iter()
            .fold(s.to_string(), |acc, (word, secret)| replace_word(&acc, word, secret))
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Case-insensitive, whole-word replacement of `word` in `haystack`.
fn replace_word(haystack: &str, word: &str, replacement: &str) -> String {
    let bytes = haystack.as_bytes();
    let needle = word.as_bytes();
    if needle.is_empty() || needle.len() > bytes.len() {
        return haystack.to_string();
    }

    let mut out = String::with_capacity(haystack.len());
    let mut copied = 0;
    let mut i = 0;
    while i + needle.len() <= bytes.len() {
        let end = i + needle.len();
        let starts_word = i == 0 || !is_word_byte(bytes[i - 1]);
        let ends_word = end == bytes.len() || !is_word_byte(bytes[end]);
        // 续字节不会等于 needle 的首字节，所以 i 一定落在字符边界上
        if starts_word && ends_word && bytes[i..end].eq_ignore_ascii_case(needle) {
            out.push_str(&haystack[copied..i]);
            out.push_str(replacement);
            copied = end;
            i = end;
        } else {
            i += 1;
        }
    }
    out.push_str(&haystack[copied..]);
    out
}
