//! Compiled wildcard patterns for `KEYS`.
//!
//! Supports the Redis glob dialect: `*` (any run), `?` (any single
//! character), `[abc]` / `[a-c]` / `[^abc]` character classes, and `\x`
//! escapes. Patterns are compiled to a token list once, then matched with
//! backtracking.

use thiserror::Error;

/// Errors raised while compiling a pattern.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("unterminated character class")]
    UnterminatedClass,
    #[error("trailing escape")]
    TrailingEscape,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(u8),
    /// `*`
    Any,
    /// `?`
    One,
    Class {
        negated: bool,
        singles: Vec<u8>,
        ranges: Vec<(u8, u8)>,
    },
}

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    tokens: Vec<Token>,
}

impl Pattern {
    /// Compiles `pattern`, rejecting unterminated classes and trailing
    /// escapes.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let bytes = pattern.as_bytes();
        let mut tokens = Vec::with_capacity(bytes.len());
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'*' => {
                    // Runs of stars collapse to one.
                    if tokens.last() != Some(&Token::Any) {
                        tokens.push(Token::Any);
                    }
                    i += 1;
                }
                b'?' => {
                    tokens.push(Token::One);
                    i += 1;
                }
                b'\\' => {
                    let escaped = *bytes.get(i + 1).ok_or(PatternError::TrailingEscape)?;
                    tokens.push(Token::Literal(escaped));
                    i += 2;
                }
                b'[' => {
                    let (token, consumed) = compile_class(&bytes[i..])?;
                    tokens.push(token);
                    i += consumed;
                }
                c => {
                    tokens.push(Token::Literal(c));
                    i += 1;
                }
            }
        }

        Ok(Self { tokens })
    }

    /// Tests `text` against the pattern.
    pub fn matches(&self, text: &str) -> bool {
        match_tokens(&self.tokens, text.as_bytes())
    }
}

/// Compiles a `[...]` class starting at `bytes[0] == b'['`. Returns the
/// token and the number of pattern bytes consumed.
fn compile_class(bytes: &[u8]) -> Result<(Token, usize), PatternError> {
    let mut i = 1;
    let negated = bytes.get(i) == Some(&b'^');
    if negated {
        i += 1;
    }

    let mut singles = Vec::new();
    let mut ranges = Vec::new();

    while i < bytes.len() && bytes[i] != b']' {
        let c = if bytes[i] == b'\\' {
            i += 1;
            *bytes.get(i).ok_or(PatternError::UnterminatedClass)?
        } else {
            bytes[i]
        };

        // A dash with a class member on both sides forms a range.
        if bytes.get(i + 1) == Some(&b'-') && bytes.get(i + 2).is_some_and(|&b| b != b']') {
            ranges.push((c, bytes[i + 2]));
            i += 3;
        } else {
            singles.push(c);
            i += 1;
        }
    }

    if i >= bytes.len() {
        return Err(PatternError::UnterminatedClass);
    }

    Ok((
        Token::Class {
            negated,
            singles,
            ranges,
        },
        i + 1,
    ))
}

fn match_tokens(tokens: &[Token], text: &[u8]) -> bool {
    match tokens.first() {
        None => text.is_empty(),
        Some(Token::Any) => (0..=text.len()).any(|skip| match_tokens(&tokens[1..], &text[skip..])),
        Some(Token::One) => !text.is_empty() && match_tokens(&tokens[1..], &text[1..]),
        Some(Token::Literal(c)) => {
            text.first() == Some(c) && match_tokens(&tokens[1..], &text[1..])
        }
        Some(Token::Class {
            negated,
            singles,
            ranges,
        }) => match text.first() {
            None => false,
            Some(&c) => {
                let inside =
                    singles.contains(&c) || ranges.iter().any(|&(lo, hi)| c >= lo && c <= hi);
                inside != *negated && match_tokens(&tokens[1..], &text[1..])
            }
        },
    }
}
