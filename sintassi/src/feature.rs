//! Per-position feature extraction for sequence labeling.

use std::collections::BTreeMap;

use bincode::{
    de::{BorrowDecoder, Decoder},
    enc::Encoder,
    error::{DecodeError, EncodeError},
    BorrowDecode, Decode, Encode,
};
use daachorse::DoubleArrayAhoCorasick;

use crate::errors::{Result, SintassiError};
use crate::token::Token;

/// Value of a feature.
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureValue {
    Str(String),
    Bool(bool),
    Num(f64),
}

/// Features of one token position, keyed by stable feature names.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureSet {
    features: BTreeMap<String, FeatureValue>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K>(&mut self, name: K, value: FeatureValue)
    where
        K: Into<String>,
    {
        self.features.insert(name.into(), value);
    }

    fn insert_str<K, V>(&mut self, name: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.insert(name, FeatureValue::Str(value.into()));
    }

    fn insert_flag<K>(&mut self, name: K)
    where
        K: Into<String>,
    {
        self.insert(name, FeatureValue::Bool(true));
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.features.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureValue)> {
        self.features.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Converts the features into weighted attribute strings.
    ///
    /// String values become `name=value` with weight 1, true flags become `name` with
    /// weight 1, false flags are dropped and numbers become `name` weighted by the number.
    pub fn attributes(&self) -> impl Iterator<Item = (String, f64)> + '_ {
        self.features
            .iter()
            .filter_map(|(name, value)| match value {
                FeatureValue::Str(s) => Some((format!("{name}={s}"), 1.0)),
                FeatureValue::Bool(true) => Some((name.clone(), 1.0)),
                FeatureValue::Bool(false) => None,
                FeatureValue::Num(x) => Some((name.clone(), *x)),
            })
    }
}

/// Configuration of a [`FeatureExtractor`].
#[derive(Clone, Debug, PartialEq, Eq, Decode, Encode)]
pub struct FeatureConfig {
    /// Number of neighboring tokens on each side that contribute context features.
    pub window: usize,

    /// Longest prefix and suffix length.
    pub max_affix: usize,

    /// Gazetteer entries as `(phrase, category)`. Phrases are matched case-insensitively on
    /// token boundaries and may span several tokens.
    pub gazetteer: Vec<(String, String)>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window: 2,
            max_affix: 4,
            gazetteer: vec![],
        }
    }
}

impl FeatureConfig {
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_affix(mut self, max_affix: usize) -> Self {
        self.max_affix = max_affix;
        self
    }

    pub fn with_gazetteer(mut self, gazetteer: Vec<(String, String)>) -> Self {
        self.gazetteer = gazetteer;
        self
    }
}

struct Gazetteer {
    pma: DoubleArrayAhoCorasick<u32>,
    categories: Vec<Vec<String>>,
}

impl Gazetteer {
    fn new(entries: &[(String, String)]) -> Result<Option<Self>> {
        // Phrases are normalized and grouped so that each pattern appears once.
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (phrase, category) in entries {
            let normalized = normalize_phrase(phrase);
            if normalized.is_empty() {
                return Err(SintassiError::invalid_argument(
                    "gazetteer",
                    "contains an empty phrase",
                ));
            }
            let categories = grouped.entry(normalized).or_default();
            if !categories.contains(category) {
                categories.push(category.clone());
            }
        }
        if grouped.is_empty() {
            return Ok(None);
        }
        let (patterns, categories): (Vec<_>, Vec<_>) = grouped.into_iter().unzip();
        let pma = DoubleArrayAhoCorasick::new(patterns)
            .map_err(|e| SintassiError::invalid_argument("gazetteer", e.to_string()))?;
        Ok(Some(Self { pma, categories }))
    }

    /// Returns `(first token, last token, categories)` for every match on token boundaries.
    fn find<'a>(&'a self, tokens: &[Token]) -> Vec<(usize, usize, &'a [String])> {
        let mut haystack = String::new();
        let mut starts = vec![];
        let mut ends = vec![];
        for token in tokens {
            if !haystack.is_empty() {
                haystack.push(' ');
            }
            starts.push(haystack.len());
            haystack.push_str(&token.text().to_lowercase());
            ends.push(haystack.len());
        }
        let mut matches = vec![];
        for m in self.pma.find_overlapping_iter(&haystack) {
            let first = starts.binary_search(&m.start());
            let last = ends.binary_search(&m.end());
            if let (Ok(first), Ok(last)) = (first, last) {
                matches.push((first, last, self.categories[m.value() as usize].as_slice()));
            }
        }
        matches
    }
}

/// Extracts lexical, orthographic, affix, contextual, gazetteer and pattern features.
///
/// The same token in the same context always yields byte-identical feature names, so a
/// model trained with one extractor can look its weights up with an extractor built
/// from the same [`FeatureConfig`].
pub struct FeatureExtractor {
    config: FeatureConfig,
    gazetteer: Option<Gazetteer>,
}

impl FeatureExtractor {
    /// Creates a new extractor.
    ///
    /// # Errors
    ///
    /// If the gazetteer contains an empty phrase, an error variant will be returned.
    pub fn new(config: FeatureConfig) -> Result<Self> {
        let gazetteer = Gazetteer::new(&config.gazetteer)?;
        Ok(Self { config, gazetteer })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Extracts the features of the token at `index`.
    ///
    /// An out-of-range index yields an empty feature set.
    pub fn extract(&self, tokens: &[Token], index: usize) -> FeatureSet {
        if index >= tokens.len() {
            return FeatureSet::new();
        }
        let matches = self.gazetteer_matches(tokens);
        self.extract_with(tokens, index, &matches)
    }

    /// Extracts the features of every position.
    pub fn extract_all(&self, tokens: &[Token]) -> Vec<FeatureSet> {
        let matches = self.gazetteer_matches(tokens);
        (0..tokens.len())
            .map(|i| self.extract_with(tokens, i, &matches))
            .collect()
    }

    fn gazetteer_matches<'a>(&'a self, tokens: &[Token]) -> Vec<(usize, usize, &'a [String])> {
        self.gazetteer
            .as_ref()
            .map_or_else(Vec::new, |g| g.find(tokens))
    }

    fn extract_with(
        &self,
        tokens: &[Token],
        index: usize,
        matches: &[(usize, usize, &[String])],
    ) -> FeatureSet {
        let mut fs = FeatureSet::new();
        let token = &tokens[index];
        let word = token.text();
        let lower = word.to_lowercase();
        let chars: Vec<char> = word.chars().collect();

        // lexical
        fs.insert_flag("bias");
        fs.insert_str("w", lower.as_str());
        if let Some(pos) = token.pos() {
            fs.insert_str("pos", pos);
        }
        if let Some(lemma) = token.lemma() {
            fs.insert_str("lemma", lemma.to_lowercase());
        }

        // orthographic
        let shape = word_shape(word);
        fs.insert_str("short_shape", short_shape(&shape));
        fs.insert_str("shape", shape);
        let n_alpha = chars.iter().filter(|c| c.is_alphabetic()).count();
        if chars.first().map_or(false, |c| c.is_uppercase())
            && chars.iter().skip(1).all(|c| !c.is_uppercase())
        {
            fs.insert_flag("is_title");
        }
        if n_alpha > 0 && chars.iter().all(|c| !c.is_lowercase()) {
            fs.insert_flag("is_upper");
        }
        if n_alpha > 0 && chars.iter().all(|c| !c.is_uppercase()) {
            fs.insert_flag("is_lower");
        }
        if chars.iter().all(char::is_ascii_digit) {
            fs.insert_flag("is_digit");
        } else if chars.iter().any(char::is_ascii_digit) {
            fs.insert_flag("has_digit");
        }
        if chars.len() > 1 && chars.contains(&'-') {
            fs.insert_flag("has_hyphen");
        }
        if chars
            .iter()
            .all(|c| c.is_ascii_punctuation() || (!c.is_alphanumeric() && !c.is_whitespace()))
        {
            fs.insert_flag("is_punct");
        }
        fs.insert("len", FeatureValue::Num((chars.len() as f64 / 10.).min(1.)));

        // affix
        let lower_chars: Vec<char> = lower.chars().collect();
        for n in 1..=self.config.max_affix.min(lower_chars.len()) {
            let prefix: String = lower_chars[..n].iter().collect();
            let suffix: String = lower_chars[lower_chars.len() - n..].iter().collect();
            fs.insert_str(format!("prefix{n}"), prefix);
            fs.insert_str(format!("suffix{n}"), suffix);
        }

        // contextual
        if index == 0 {
            fs.insert_flag("BOS");
        } else {
            let prev = tokens[index - 1].text().to_lowercase();
            fs.insert_str("w[-1]|w", format!("{prev}|{lower}"));
        }
        if index + 1 == tokens.len() {
            fs.insert_flag("EOS");
        } else {
            let next = tokens[index + 1].text().to_lowercase();
            fs.insert_str("w|w[+1]", format!("{lower}|{next}"));
        }
        for k in 1..=self.config.window {
            if let Some(other) = index.checked_sub(k).map(|i| &tokens[i]) {
                Self::insert_context(&mut fs, &format!("-{k}"), other);
            }
            if let Some(other) = tokens.get(index + k) {
                Self::insert_context(&mut fs, &format!("+{k}"), other);
            }
        }

        // gazetteer
        for &(first, last, categories) in matches {
            if index < first || last < index {
                continue;
            }
            for category in categories {
                let name = format!("gaz:{category}");
                if index == first {
                    fs.insert_str(name, "B");
                } else if !fs.contains(&name) {
                    fs.insert_str(name, "I");
                }
            }
        }

        // pattern
        if let Some(pattern) = word_pattern(word) {
            fs.insert_str("pattern", pattern);
        }

        fs
    }

    fn insert_context(fs: &mut FeatureSet, rel: &str, other: &Token) {
        fs.insert_str(format!("w[{rel}]"), other.text().to_lowercase());
        if let Some(pos) = other.pos() {
            fs.insert_str(format!("pos[{rel}]"), pos);
        }
        fs.insert_str(
            format!("short_shape[{rel}]"),
            short_shape(&word_shape(other.text())),
        );
    }
}

impl Encode for FeatureExtractor {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        Encode::encode(&self.config, encoder)
    }
}

impl Decode for FeatureExtractor {
    fn decode<D: Decoder>(decoder: &mut D) -> Result<Self, DecodeError> {
        let config: FeatureConfig = Decode::decode(decoder)?;
        Self::new(config).map_err(|e| DecodeError::OtherString(e.to_string()))
    }
}

impl<'de> BorrowDecode<'de> for FeatureExtractor {
    fn borrow_decode<D: BorrowDecoder<'de>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Self::decode(decoder)
    }
}

fn normalize_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Maps uppercase letters to `X`, lowercase letters to `x` and digits to `d`.
fn word_shape(word: &str) -> String {
    word.chars()
        .map(|c| {
            if c.is_uppercase() {
                'X'
            } else if c.is_lowercase() {
                'x'
            } else if c.is_ascii_digit() {
                'd'
            } else {
                c
            }
        })
        .collect()
}

fn short_shape(shape: &str) -> String {
    let mut result = String::with_capacity(shape.len());
    let mut prev = None;
    for c in shape.chars() {
        if prev != Some(c) {
            result.push(c);
        }
        prev = Some(c);
    }
    result
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn word_pattern(word: &str) -> Option<&'static str> {
    let lower = word.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.")
    {
        return Some("url");
    }
    if let Some((local, domain)) = word.split_once('@') {
        if !local.is_empty() && domain.contains('.') && !domain.ends_with('.') {
            return Some("email");
        }
    }
    if let Some((h, m)) = word.split_once(':') {
        if all_digits(h) && h.len() <= 2 && all_digits(m) && m.len() == 2 {
            return Some("time");
        }
    }
    if all_digits(word) {
        if word.len() == 4 && matches!(word.parse::<u32>(), Ok(1000..=2099)) {
            return Some("year");
        }
        return Some("number");
    }
    let mut parts = word.split(|c| c == '.' || c == ',');
    if word.len() > 2
        && parts.next().map_or(false, all_digits)
        && parts.all(all_digits)
    {
        return Some("decimal");
    }
    for suffix in ["st", "nd", "rd", "th"] {
        if let Some(num) = lower.strip_suffix(suffix) {
            if all_digits(num) {
                return Some("ordinal");
            }
        }
    }
    let bytes = word.as_bytes();
    if bytes.len() == 2 && bytes[0].is_ascii_uppercase() && bytes[1] == b'.' {
        return Some("initial");
    }
    if bytes.len() >= 4
        && bytes.len() % 2 == 0
        && bytes
            .chunks(2)
            .all(|c| c[0].is_ascii_uppercase() && c[1] == b'.')
    {
        return Some("acronym");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<Token> {
        words.iter().map(|&w| Token::new(w)).collect()
    }

    fn str_value(fs: &FeatureSet, name: &str) -> Option<String> {
        match fs.get(name) {
            Some(FeatureValue::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    #[test]
    fn test_feature_extractor_empty_gazetteer_phrase() {
        let config = FeatureConfig::default()
            .with_gazetteer(vec![(" ".to_string(), "LOC".to_string())]);
        let fe = FeatureExtractor::new(config);

        assert_eq!(
            "InvalidArgumentError: gazetteer: contains an empty phrase",
            &fe.err().unwrap().to_string()
        );
    }

    #[test]
    fn test_feature_extractor_lexical_orthographic() {
        let fe = FeatureExtractor::new(FeatureConfig::default()).unwrap();
        let toks = vec![Token::new("McDonald").with_pos("NNP"), Token::new("sells")];
        let fs = fe.extract(&toks, 0);

        assert_eq!(Some("mcdonald".to_string()), str_value(&fs, "w"));
        assert_eq!(Some("NNP".to_string()), str_value(&fs, "pos"));
        assert_eq!(Some("XxXxxxxx".to_string()), str_value(&fs, "shape"));
        assert_eq!(Some("XxXx".to_string()), str_value(&fs, "short_shape"));
        assert_eq!(Some("mcdo".to_string()), str_value(&fs, "prefix4"));
        assert_eq!(Some("ald".to_string()), str_value(&fs, "suffix3"));
        assert!(fs.contains("BOS"));
        assert!(!fs.contains("EOS"));
        assert!(!fs.contains("is_title"));
        assert_eq!(Some("sells".to_string()), str_value(&fs, "w[+1]"));
        assert_eq!(Some(&FeatureValue::Num(0.8)), fs.get("len"));
    }

    #[test]
    fn test_feature_extractor_window() {
        let fe = FeatureExtractor::new(FeatureConfig::default().with_window(1)).unwrap();
        let toks = tokens(&["a", "b", "c", "d"]);
        let fs = fe.extract(&toks, 2);

        assert_eq!(Some("b".to_string()), str_value(&fs, "w[-1]"));
        assert_eq!(Some("d".to_string()), str_value(&fs, "w[+1]"));
        assert!(!fs.contains("w[-2]"));
        assert_eq!(Some("b|c".to_string()), str_value(&fs, "w[-1]|w"));
    }

    #[test]
    fn test_feature_extractor_out_of_range() {
        let fe = FeatureExtractor::new(FeatureConfig::default()).unwrap();

        assert!(fe.extract(&tokens(&["a"]), 3).is_empty());
        assert!(fe.extract_all(&[]).is_empty());
    }

    #[test]
    fn test_feature_extractor_gazetteer() {
        let config = FeatureConfig::default().with_gazetteer(vec![
            ("New York".to_string(), "LOC".to_string()),
            ("york".to_string(), "PER".to_string()),
            ("new york".to_string(), "ORG".to_string()),
        ]);
        let fe = FeatureExtractor::new(config).unwrap();
        let toks = tokens(&["in", "new", "York", "newyork"]);
        let all = fe.extract_all(&toks);

        assert_eq!(None, str_value(&all[0], "gaz:LOC"));
        assert_eq!(Some("B".to_string()), str_value(&all[1], "gaz:LOC"));
        assert_eq!(Some("B".to_string()), str_value(&all[1], "gaz:ORG"));
        assert_eq!(Some("I".to_string()), str_value(&all[2], "gaz:LOC"));
        assert_eq!(Some("B".to_string()), str_value(&all[2], "gaz:PER"));
        assert!(!all[3].contains("gaz:LOC"));
        assert!(!all[3].contains("gaz:PER"));
    }

    #[test]
    fn test_feature_extractor_is_deterministic() {
        let fe = FeatureExtractor::new(FeatureConfig::default()).unwrap();
        let toks = tokens(&["Mary", "visited", "Paris", "in", "2019", "."]);

        let a: Vec<_> = fe.extract_all(&toks)[4].attributes().collect();
        let b: Vec<_> = fe.extract(&toks, 4).attributes().collect();
        assert_eq!(a, b);
        assert!(a.contains(&("pattern=year".to_string(), 1.0)));
        assert!(a.contains(&("is_digit".to_string(), 1.0)));
    }

    #[test]
    fn test_word_pattern() {
        assert_eq!(Some("year"), word_pattern("1999"));
        assert_eq!(Some("number"), word_pattern("42"));
        assert_eq!(Some("decimal"), word_pattern("3.14"));
        assert_eq!(Some("decimal"), word_pattern("1,000"));
        assert_eq!(Some("ordinal"), word_pattern("21st"));
        assert_eq!(Some("initial"), word_pattern("J."));
        assert_eq!(Some("acronym"), word_pattern("U.S."));
        assert_eq!(Some("time"), word_pattern("9:30"));
        assert_eq!(Some("email"), word_pattern("a@b.org"));
        assert_eq!(Some("url"), word_pattern("https://example.com"));
        assert_eq!(None, word_pattern("dog"));
        assert_eq!(None, word_pattern("."));
    }

    #[test]
    fn test_feature_extractor_round_trip() {
        let config = FeatureConfig::default()
            .with_window(3)
            .with_gazetteer(vec![("paris".to_string(), "LOC".to_string())]);
        let fe = FeatureExtractor::new(config.clone()).unwrap();

        let bytes = bincode::encode_to_vec(&fe, bincode::config::standard()).unwrap();
        let (decoded, _): (FeatureExtractor, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard()).unwrap();

        assert_eq!(&config, decoded.config());
        let toks = tokens(&["Paris"]);
        assert_eq!(fe.extract(&toks, 0), decoded.extract(&toks, 0));
    }
}
