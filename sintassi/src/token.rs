use std::ops::Range;

use crate::errors::{Result, SintassiError};

/// A token of an input sentence.
///
/// Tokens are produced by an external tokenizer and are only read by this crate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Token {
    text: String,
    pos: Option<String>,
    lemma: Option<String>,
    span: Range<usize>,
}

impl Token {
    /// Creates a new token without annotations.
    ///
    /// The span is set to `0..text.len()`.
    pub fn new<S>(text: S) -> Self
    where
        S: Into<String>,
    {
        let text = text.into();
        let span = 0..text.len();
        Self {
            text,
            pos: None,
            lemma: None,
            span,
        }
    }

    /// Sets a part-of-speech tag.
    pub fn with_pos<S>(mut self, pos: S) -> Self
    where
        S: Into<String>,
    {
        self.pos = Some(pos.into());
        self
    }

    /// Sets a lemma.
    pub fn with_lemma<S>(mut self, lemma: S) -> Self
    where
        S: Into<String>,
    {
        self.lemma = Some(lemma.into());
        self
    }

    /// Sets the position span in the original text.
    pub fn with_span(mut self, span: Range<usize>) -> Self {
        self.span = span;
        self
    }

    /// Gets the surface string.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Gets the part-of-speech tag if annotated.
    pub fn pos(&self) -> Option<&str> {
        self.pos.as_deref()
    }

    /// Gets the lemma if annotated.
    pub fn lemma(&self) -> Option<&str> {
        self.lemma.as_deref()
    }

    /// Gets the position span.
    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }
}

/// A token sequence paired with one gold label per token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabeledSentence {
    pub tokens: Vec<Token>,
    pub labels: Vec<String>,
}

impl LabeledSentence {
    /// Creates a new labeled sentence. Lengths are validated by the trainer.
    pub fn new(tokens: Vec<Token>, labels: Vec<String>) -> Self {
        Self { tokens, labels }
    }

    /// Creates a labeled sentence from a line of `text/label` or `text/pos/label` items
    /// separated by whitespaces. A slash in a word is written as `\/`.
    ///
    /// # Errors
    ///
    /// This function will return an error variant when:
    ///
    /// * `line` contains no tokens.
    /// * An item has no label or more than three fields.
    ///
    /// # Examples
    ///
    /// ```
    /// use sintassi::LabeledSentence;
    ///
    /// let s = LabeledSentence::from_annotated("John/NNP/B-PER runs/VBZ/O").unwrap();
    /// assert_eq!(vec!["B-PER", "O"], s.labels);
    /// assert_eq!(Some("VBZ"), s.tokens[1].pos());
    ///
    /// assert!(LabeledSentence::from_annotated("John").is_err());
    /// ```
    pub fn from_annotated<S>(line: S) -> Result<Self>
    where
        S: AsRef<str>,
    {
        let mut tokens = vec![];
        let mut labels = vec![];
        let mut offset = 0;
        for item in line.as_ref().split_whitespace() {
            let mut fields = split_fields(item);
            let label = match fields.len() {
                2 | 3 => fields.pop().unwrap_or_default(),
                _ => {
                    return Err(SintassiError::invalid_format(
                        "labeled sentence",
                        format!("`{item}` must be text/label or text/pos/label"),
                    ))
                }
            };
            if label.is_empty() || fields[0].is_empty() {
                return Err(SintassiError::invalid_format(
                    "labeled sentence",
                    format!("`{item}` contains an empty field"),
                ));
            }
            let token = make_token(&mut fields, &mut offset);
            tokens.push(token);
            labels.push(label);
        }
        if tokens.is_empty() {
            return Err(SintassiError::invalid_format(
                "labeled sentence",
                "the line is empty",
            ));
        }
        Ok(Self { tokens, labels })
    }

    /// Generates a line in the format read by [`LabeledSentence::from_annotated()`].
    pub fn to_annotated_string(&self) -> String {
        annotate(&self.tokens, &self.labels)
    }
}

/// Reads a whitespace-separated line of `text` or `text/pos` items.
///
/// # Errors
///
/// An error variant will be returned if an item has more than two fields or an empty field.
///
/// # Examples
///
/// ```
/// use sintassi::tokens_from_annotated;
///
/// let tokens = tokens_from_annotated("the/DT dog/NN barks").unwrap();
/// assert_eq!(3, tokens.len());
/// assert_eq!(Some("NN"), tokens[1].pos());
/// assert_eq!(None, tokens[2].pos());
/// ```
pub fn tokens_from_annotated<S>(line: S) -> Result<Vec<Token>>
where
    S: AsRef<str>,
{
    let mut tokens = vec![];
    let mut offset = 0;
    for item in line.as_ref().split_whitespace() {
        let mut fields = split_fields(item);
        if fields.len() > 2 || fields.iter().any(|f| f.is_empty()) {
            return Err(SintassiError::invalid_format(
                "tokens",
                format!("`{item}` must be text or text/pos"),
            ));
        }
        tokens.push(make_token(&mut fields, &mut offset));
    }
    Ok(tokens)
}

/// Joins tokens and labels as `text/label` items.
pub fn annotate<S>(tokens: &[Token], labels: &[S]) -> String
where
    S: AsRef<str>,
{
    let mut result = String::new();
    for (i, (token, label)) in tokens.iter().zip(labels).enumerate() {
        if i != 0 {
            result.push(' ');
        }
        for c in token.text().chars() {
            if c == '/' || c == '\\' {
                result.push('\\');
            }
            result.push(c);
        }
        result.push('/');
        result.push_str(label.as_ref());
    }
    result
}

fn make_token(fields: &mut Vec<String>, offset: &mut usize) -> Token {
    let pos = if fields.len() == 2 { fields.pop() } else { None };
    let text = fields.pop().unwrap_or_default();
    let start = *offset;
    *offset += text.len() + 1;
    let mut token = Token::new(text).with_span(start..*offset - 1);
    token.pos = pos;
    token
}

fn split_fields(item: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut escape = false;
    for c in item.chars() {
        match (escape, c) {
            (false, '\\') => escape = true,
            (false, '/') => fields.push(String::new()),
            (_, c) => {
                escape = false;
                if let Some(last) = fields.last_mut() {
                    last.push(c);
                }
            }
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labeled_sentence_from_annotated() {
        let s = LabeledSentence::from_annotated("John/NNP/B-PER Smith/I-PER").unwrap();

        assert_eq!(
            vec![
                Token::new("John").with_pos("NNP").with_span(0..4),
                Token::new("Smith").with_span(5..10),
            ],
            s.tokens
        );
        assert_eq!(vec!["B-PER", "I-PER"], s.labels);
    }

    #[test]
    fn test_labeled_sentence_escaped_slash() {
        let s = LabeledSentence::from_annotated("1\\/2/CD/O").unwrap();

        assert_eq!("1/2", s.tokens[0].text());
        assert_eq!(Some("CD"), s.tokens[0].pos());
        assert_eq!("1\\/2/O", s.to_annotated_string());
    }

    #[test]
    fn test_labeled_sentence_empty() {
        let s = LabeledSentence::from_annotated("   ");

        assert_eq!(
            "InvalidFormatError: labeled sentence: the line is empty",
            &s.err().unwrap().to_string()
        );
    }

    #[test]
    fn test_labeled_sentence_too_many_fields() {
        let s = LabeledSentence::from_annotated("a/b/c/d");

        assert!(s.is_err());
    }

    #[test]
    fn test_tokens_from_annotated_empty_line() {
        let tokens = tokens_from_annotated("").unwrap();

        assert!(tokens.is_empty());
    }
}
