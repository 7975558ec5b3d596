//! OSC address-pattern matching.
//!
//! Patterns are matched segment by segment; a wildcard never crosses a `/`.
//!
//! | Syntax      | Matches                                   |
//! |-------------|-------------------------------------------|
//! | `?`         | any single character                      |
//! | `*`         | any run of characters (including none)    |
//! | `[abc]`     | one of the listed characters              |
//! | `[a-z]`     | one character in the range                |
//! | `[!abc]`    | one character not listed                  |
//! | `{foo,bar}` | any of the comma-separated literals       |
//!
//! Everything else matches itself, so a pattern without wildcards matches
//! only the identical address.

use std::fmt;

use thiserror::Error;

/// Errors raised while compiling an address pattern.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("Pattern must start with '/': {0:?}")]
    MissingSlash(String),

    #[error("Unclosed '[' in pattern {0:?}")]
    UnclosedBracket(String),

    #[error("Unclosed '{{' in pattern {0:?}")]
    UnclosedBrace(String),

    #[error("Empty character class in pattern {0:?}")]
    EmptyClass(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    AnyRun,
    Class { negated: bool, ranges: Vec<(char, char)> },
    Choice(Vec<Vec<char>>),
}

/// A compiled address pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPattern {
    source: String,
    segments: Vec<Vec<Token>>,
    literal: bool,
}

impl AddressPattern {
    /// Compiles `pattern`.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let body = pattern
            .strip_prefix('/')
            .ok_or_else(|| PatternError::MissingSlash(pattern.to_string()))?;

        let segments = body
            .split('/')
            .map(|segment| parse_segment(segment, pattern))
            .collect::<Result<Vec<_>, _>>()?;

        let literal = segments
            .iter()
            .flatten()
            .all(|token| matches!(token, Token::Literal(_)));

        Ok(Self {
            source: pattern.to_string(),
            segments,
            literal,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if the pattern contains no wildcards.
    pub fn is_literal(&self) -> bool {
        self.literal
    }

    /// Returns true if `address` is matched by this pattern.
    pub fn matches(&self, address: &str) -> bool {
        if self.literal {
            return self.source == address;
        }
        let Some(body) = address.strip_prefix('/') else {
            return false;
        };
        let parts: Vec<&str> = body.split('/').collect();
        if parts.len() != self.segments.len() {
            return false;
        }
        self.segments.iter().zip(parts).all(|(tokens, part)| {
            let chars: Vec<char> = part.chars().collect();
            match_tokens(tokens, &chars)
        })
    }
}

impl fmt::Display for AddressPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for AddressPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Convenience for one-off checks; compiles `pattern` on every call.
pub fn pattern_matches(pattern: &str, address: &str) -> Result<bool, PatternError> {
    Ok(AddressPattern::parse(pattern)?.matches(address))
}

fn parse_segment(segment: &str, pattern: &str) -> Result<Vec<Token>, PatternError> {
    let mut tokens = Vec::new();
    let mut chars = segment.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '?' => tokens.push(Token::AnyChar),
            '*' => {
                if tokens.last() != Some(&Token::AnyRun) {
                    tokens.push(Token::AnyRun);
                }
            }
            '[' => {
                let negated = chars.next_if_eq(&'!').is_some();
                let mut ranges = Vec::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    match (chars.peek().copied(), c) {
                        (Some('-'), lo) => {
                            chars.next();
                            match chars.peek().copied() {
                                Some(hi) if hi != ']' => {
                                    chars.next();
                                    ranges.push((lo.min(hi), lo.max(hi)));
                                }
                                // trailing '-' is literal
                                _ => {
                                    ranges.push((lo, lo));
                                    ranges.push(('-', '-'));
                                }
                            }
                        }
                        (_, single) => ranges.push((single, single)),
                    }
                }
                if !closed {
                    return Err(PatternError::UnclosedBracket(pattern.to_string()));
                }
                if ranges.is_empty() {
                    return Err(PatternError::EmptyClass(pattern.to_string()));
                }
                tokens.push(Token::Class { negated, ranges });
            }
            '{' => {
                let mut options = vec![Vec::new()];
                let mut closed = false;
                for c in chars.by_ref() {
                    match c {
                        '}' => {
                            closed = true;
                            break;
                        }
                        ',' => options.push(Vec::new()),
                        other => {
                            if let Some(current) = options.last_mut() {
                                current.push(other);
                            }
                        }
                    }
                }
                if !closed {
                    return Err(PatternError::UnclosedBrace(pattern.to_string()));
                }
                tokens.push(Token::Choice(options));
            }
            other => tokens.push(Token::Literal(other)),
        }
    }
    Ok(tokens)
}

fn match_tokens(tokens: &[Token], text: &[char]) -> bool {
    let Some((token, rest)) = tokens.split_first() else {
        return text.is_empty();
    };

    match token {
        Token::Literal(c) => match text.split_first() {
            Some((first, tail)) => first == c && match_tokens(rest, tail),
            None => false,
        },
        Token::AnyChar => match text.split_first() {
            Some((_, tail)) => match_tokens(rest, tail),
            None => false,
        },
        Token::AnyRun => (0..=text.len()).any(|skip| {
            text.get(skip..)
                .map(|tail| match_tokens(rest, tail))
                .unwrap_or(false)
        }),
        Token::Class { negated, ranges } => match text.split_first() {
            Some((first, tail)) => {
                let hit = ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(first));
                hit != *negated && match_tokens(rest, tail)
            }
            None => false,
        },
        Token::Choice(options) => options.iter().any(|option| {
            text.starts_with(option)
                && text
                    .get(option.len()..)
                    .map(|tail| match_tokens(rest, tail))
                    .unwrap_or(false)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, address: &str) -> bool {
        pattern_matches(pattern, address).unwrap()
    }

    #[test]
    fn test_literal_matches_only_itself() {
        let pattern = AddressPattern::parse("/test/m4l").unwrap();
        assert!(pattern.is_literal());
        assert!(pattern.matches("/test/m4l"));
        assert!(!pattern.matches("/test/m4l/extra"));
        assert!(!pattern.matches("/test/m4"));
        assert!(!pattern.matches("/test"));
        assert!(!pattern.matches("/other/m4l"));
    }

    #[test]
    fn test_star_within_segment() {
        assert!(matches("/test/*", "/test/m4l"));
        assert!(matches("/test/*", "/test/"));
        assert!(!matches("/test/*", "/test/a/b"));
        assert!(matches("/track/*/volume", "/track/3/volume"));
        assert!(matches("/synth/osc*", "/synth/osc1"));
        assert!(matches("/synth/*1", "/synth/osc1"));
        assert!(!matches("/synth/*1", "/synth/osc2"));
        assert!(matches("/a/*x*y", "/a/_x__y"));
    }

    #[test]
    fn test_question_mark() {
        assert!(matches("/osc?", "/osc1"));
        assert!(!matches("/osc?", "/osc"));
        assert!(!matches("/osc?", "/osc12"));
    }

    #[test]
    fn test_character_classes() {
        assert!(matches("/ch[123]", "/ch2"));
        assert!(!matches("/ch[123]", "/ch4"));
        assert!(matches("/ch[a-c]", "/chb"));
        assert!(matches("/ch[c-a]", "/chb"));
        assert!(!matches("/ch[a-c]", "/chd"));
        assert!(matches("/ch[!a-c]", "/chd"));
        assert!(!matches("/ch[!a-c]", "/cha"));
        assert!(matches("/x[a-]", "/x-"));
    }

    #[test]
    fn test_choices() {
        assert!(matches("/mixer/{left,right}/gain", "/mixer/left/gain"));
        assert!(matches("/mixer/{left,right}/gain", "/mixer/right/gain"));
        assert!(!matches("/mixer/{left,right}/gain", "/mixer/center/gain"));
        assert!(matches("/{a,ab}c", "/abc"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert_eq!(
            AddressPattern::parse("test"),
            Err(PatternError::MissingSlash("test".to_string()))
        );
        assert!(matches!(
            AddressPattern::parse("/ch[12"),
            Err(PatternError::UnclosedBracket(_))
        ));
        assert!(matches!(
            AddressPattern::parse("/{a,b"),
            Err(PatternError::UnclosedBrace(_))
        ));
        assert!(matches!(
            AddressPattern::parse("/x[]"),
            Err(PatternError::EmptyClass(_))
        ));
    }

    #[test]
    fn test_address_without_slash_never_matches() {
        assert!(!matches("/*", "nope"));
    }

    #[test]
    fn test_display_and_from_str() {
        let pattern: AddressPattern = "/a/*".parse().unwrap();
        assert_eq!(pattern.to_string(), "/a/*");
        assert_eq!(pattern.as_str(), "/a/*");
        assert!(!pattern.is_literal());
    }
}
