//! Byte patterns with wildcards.
//!
//! Text form is whitespace separated hex bytes with `?` or `??` for a wildcard,
//! e.g. `"48 8B ?? ?? 0F 49"`.

use std::fmt;

use memchr::memmem;

use crate::error::{Error, Result};

/// A byte pattern plus the offset applied to each match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSpec {
    tokens: Vec<Option<u8>>,
    offset: i64,
    /// Longest run of literal bytes, used to locate candidates quickly.
    anchor: Vec<u8>,
    anchor_start: usize,
}

impl PatternSpec {
    pub fn new(tokens: Vec<Option<u8>>) -> Result<Self> {
        if tokens.is_empty() {
            return Err(Error::InvalidPattern("pattern is empty".to_string()));
        }

        let mut best = (0usize, 0usize);
        let mut run_start = 0usize;
        for (i, token) in tokens.iter().enumerate() {
            if token.is_none() {
                run_start = i + 1;
            } else if i + 1 - run_start > best.1 {
                best = (run_start, i + 1 - run_start);
            }
        }
        if best.1 == 0 {
            return Err(Error::InvalidPattern(
                "pattern has no literal bytes".to_string(),
            ));
        }

        let anchor = tokens[best.0..best.0 + best.1]
            .iter()
            .map(|t| t.unwrap_or_default())
            .collect();
        Ok(Self {
            tokens,
            offset: 0,
            anchor,
            anchor_start: best.0,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        Self::new(parse_pattern(text)?)
    }

    /// Signed offset added to every match address.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn tokens(&self) -> &[Option<u8>] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn matches_at(&self, haystack: &[u8], pos: usize) -> bool {
        haystack
            .get(pos..pos + self.tokens.len())
            .is_some_and(|window| {
                window
                    .iter()
                    .zip(&self.tokens)
                    .all(|(&byte, token)| token.is_none_or(|t| t == byte))
            })
    }

    /// Start positions of every match in `haystack`, ascending, overlaps included.
    pub fn find_all(&self, haystack: &[u8]) -> Vec<usize> {
        let mut matches = Vec::new();
        if haystack.len() < self.tokens.len() {
            return matches;
        }

        let finder = memmem::Finder::new(&self.anchor);
        let mut from = self.anchor_start;
        while from < haystack.len() {
            let Some(hit) = finder.find(&haystack[from..]) else {
                break;
            };
            let anchor_pos = from + hit;
            let start = anchor_pos - self.anchor_start;
            if self.matches_at(haystack, start) {
                matches.push(start);
            }
            from = anchor_pos + 1;
        }
        matches
    }
}

impl fmt::Display for PatternSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_pattern(&self.tokens))
    }
}

pub fn parse_pattern(pattern: &str) -> Result<Vec<Option<u8>>> {
    let mut bytes = Vec::new();
    for token in pattern.split_whitespace() {
        if token == "??" || token == "?" {
            bytes.push(None);
            continue;
        }
        if token.len() != 2 {
            return Err(Error::InvalidPattern(format!(
                "pattern token '{}' is not a byte",
                token
            )));
        }

        let value = u8::from_str_radix(token, 16).map_err(|e| {
            Error::InvalidPattern(format!("invalid pattern token '{}': {}", token, e))
        })?;
        bytes.push(Some(value));
    }

    if bytes.is_empty() {
        return Err(Error::InvalidPattern("pattern is empty".to_string()));
    }
    Ok(bytes)
}

pub fn format_pattern(bytes: &[Option<u8>]) -> String {
    bytes
        .iter()
        .map(|b| match b {
            Some(value) => format!("{:02X}", value),
            None => "??".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pattern_with_wildcards() {
        let bytes = parse_pattern("2B D8 B8 ?? ? ?? ?? 0F").unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[0], Some(0x2B));
        assert_eq!(bytes[3], None);
        assert_eq!(bytes[4], None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_pattern(""), Err(Error::InvalidPattern(_))));
        assert!(parse_pattern("4").is_err());
        assert!(parse_pattern("ZZ").is_err());
        assert!(parse_pattern("488B").is_err());
    }

    #[test]
    fn test_all_wildcards_rejected() {
        assert!(matches!(
            PatternSpec::parse("?? ??"),
            Err(Error::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_format_pattern() {
        let pattern = PatternSpec::parse("48 8b ? FF").unwrap();
        assert_eq!(pattern.to_string(), "48 8B ?? FF");
    }

    #[test]
    fn test_anchor_is_longest_literal_run() {
        let pattern = PatternSpec::parse("AA ?? BB CC DD ?? EE").unwrap();
        assert_eq!(pattern.anchor, vec![0xBB, 0xCC, 0xDD]);
        assert_eq!(pattern.anchor_start, 2);
    }

    #[test]
    fn test_find_all_with_wildcards() {
        let pattern = PatternSpec::parse("01 ?? 03").unwrap();
        let haystack = [1, 2, 3, 1, 9, 3, 1, 3];
        assert_eq!(pattern.find_all(&haystack), vec![0, 3]);
    }

    #[test]
    fn test_find_all_overlapping() {
        let pattern = PatternSpec::parse("AA AA").unwrap();
        assert_eq!(pattern.find_all(&[0xAA, 0xAA, 0xAA]), vec![0, 1]);
    }

    #[test]
    fn test_leading_wildcards_do_not_underflow() {
        let pattern = PatternSpec::parse("?? ?? 48 89").unwrap();
        // Anchor found at position 0, but the pattern would start before the buffer
        assert_eq!(pattern.find_all(&[0x48, 0x89, 0x00, 0x00, 0x48, 0x89]), vec![2]);
    }
}
