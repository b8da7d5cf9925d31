//! Glob Patterns for Bulk Invalidation
//!
//! One pattern syntax for every backend:
//! - `*` matches any run of bytes (including none)
//! - `?` matches exactly one byte
//! - every other byte matches itself
//!
//! Matching is byte-wise, the same way Redis `SCAN MATCH` compares keys, so a
//! pattern removes the same keys whether it runs against Redis or against the
//! in-process fallback. Redis also understands `[...]` classes and `\`
//! escapes; [`GlobPattern::to_redis_match`] escapes those so they stay literal.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Literal(u8),
    AnyOne,
    AnyRun,
}

/// Compiled glob pattern (`*` and `?` wildcards)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    source: String,
    tokens: Vec<Token>,
}

impl GlobPattern {
    /// Compile a pattern
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        let mut tokens = Vec::with_capacity(pattern.len());
        push_pattern(&mut tokens, pattern);
        Self {
            source: pattern.to_string(),
            tokens,
        }
    }

    /// Whether a raw string contains any wildcard
    #[must_use]
    pub fn has_wildcards(pattern: &str) -> bool {
        pattern.bytes().any(|b| b == b'*' || b == b'?')
    }

    /// The pattern as written
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Prepend a literal namespace; wildcards inside `prefix` are not interpreted
    #[must_use]
    pub fn with_literal_prefix(&self, prefix: &str) -> Self {
        let mut tokens = Vec::with_capacity(prefix.len() + self.tokens.len());
        tokens.extend(prefix.bytes().map(Token::Literal));
        tokens.extend_from_slice(&self.tokens);
        Self {
            source: format!("{prefix}{}", self.source),
            tokens,
        }
    }

    /// Test whether `key` matches
    #[must_use]
    pub fn is_match(&self, key: &str) -> bool {
        let key = key.as_bytes();
        let mut p = 0;
        let mut k = 0;
        // Position of the last `*` and the key offset it is currently absorbing up to
        let mut backtrack: Option<(usize, usize)> = None;

        while k < key.len() {
            match (self.tokens.get(p), key.get(k)) {
                (Some(Token::AnyRun), _) => {
                    backtrack = Some((p, k));
                    p += 1;
                }
                (Some(Token::AnyOne), _) => {
                    p += 1;
                    k += 1;
                }
                (Some(Token::Literal(expected)), Some(actual)) if expected == actual => {
                    p += 1;
                    k += 1;
                }
                _ => match backtrack {
                    Some((star, absorbed)) => {
                        p = star + 1;
                        k = absorbed + 1;
                        backtrack = Some((star, absorbed + 1));
                    }
                    None => return false,
                },
            }
        }

        self.tokens
            .get(p..)
            .is_some_and(|rest| rest.iter().all(|t| *t == Token::AnyRun))
    }

    /// Render as a Redis `MATCH` argument with identical semantics
    #[must_use]
    pub fn to_redis_match(&self) -> String {
        let mut out = Vec::with_capacity(self.tokens.len() + 8);
        for token in &self.tokens {
            match token {
                Token::AnyRun => out.push(b'*'),
                Token::AnyOne => out.push(b'?'),
                Token::Literal(b) => {
                    if matches!(b, b'*' | b'?' | b'[' | b']' | b'\\') {
                        out.push(b'\\');
                    }
                    out.push(*b);
                }
            }
        }
        // Only ASCII bytes were inserted, so the buffer is still valid UTF-8
        String::from_utf8_lossy(&out).into_owned()
    }
}

fn push_pattern(tokens: &mut Vec<Token>, pattern: &str) {
    for b in pattern.bytes() {
        let token = match b {
            b'*' => Token::AnyRun,
            b'?' => Token::AnyOne,
            other => Token::Literal(other),
        };
        // Collapse `**` so backtracking stays linear in the common case
        if token == Token::AnyRun && tokens.last() == Some(&Token::AnyRun) {
            continue;
        }
        tokens.push(token);
    }
}

impl fmt::Display for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl From<&str> for GlobPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}
