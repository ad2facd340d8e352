//! URL pathname patterns used by route rules and auditor filters.
//!
//! The accepted syntax is the pathname subset of the WHATWG URLPattern grammar:
//! * literal text, matched exactly
//! * `*` matches any run of characters, including `/`
//! * `:name` matches one non-empty path segment; `:name(regex)` supplies a custom segment regex
//! * `{...}` groups, optionally followed by `?`, `*` or `+`
//! * `\` escapes the next character
//!
//! Patterns are compiled to an anchored [`Regex`] once, when the manifest is loaded.
use std::{fmt, str::FromStr};

use regex::Regex;
use thiserror::Error;

use crate::config::models::Selector;

/// Errors raised while compiling a pattern
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PatternError {
    #[error("Unbalanced '{{' in pattern '{0}'")]
    UnclosedGroup(String),

    #[error("Unexpected '}}' in pattern '{0}'")]
    UnexpectedGroupEnd(String),

    #[error("Nested groups are not supported in pattern '{0}'")]
    NestedGroup(String),

    #[error("Unterminated regex group in pattern '{0}'")]
    UnclosedRegex(String),

    #[error("Missing parameter name after ':' in pattern '{0}'")]
    MissingName(String),

    #[error("Invalid regex in pattern '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },
}

/// A compiled pathname pattern.
#[derive(Clone)]
pub struct RoutePattern {
    source: String,
    regex: Regex,
}

impl RoutePattern {
    /// Compile a pattern string.
    pub fn new(source: &str) -> Result<Self, PatternError> {
        let body = Compiler::new(source).compile()?;
        let regex = Regex::new(&format!("^{body}$")).map_err(|e| PatternError::InvalidRegex {
            pattern: source.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// The pattern as written in the manifest.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Test a URL pathname against this pattern.
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

impl FromStr for RoutePattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl fmt::Debug for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RoutePattern").field(&self.source).finish()
    }
}

impl PartialEq for RoutePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// True if any of `patterns` matches `path`. A wildcard selector always matches.
pub fn matches(patterns: &Selector<RoutePattern>, path: &str) -> bool {
    match patterns {
        Selector::Any => true,
        Selector::Only(patterns) => patterns.iter().any(|p| p.is_match(path)),
    }
}

struct Compiler<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Compiler<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().peekable(),
        }
    }

    fn compile(mut self) -> Result<String, PatternError> {
        let mut out = String::new();
        while let Some(c) = self.chars.next() {
            match c {
                '{' => {
                    let inner = self.group()?;
                    out.push_str(&format!("(?:{inner}){}", self.modifier()));
                }
                '}' => return Err(PatternError::UnexpectedGroupEnd(self.source.to_string())),
                _ => self.token(c, &mut out)?,
            }
        }
        Ok(out)
    }

    fn group(&mut self) -> Result<String, PatternError> {
        let mut inner = String::new();
        loop {
            match self.chars.next() {
                Some('}') => return Ok(inner),
                Some('{') => return Err(PatternError::NestedGroup(self.source.to_string())),
                Some(c) => self.token(c, &mut inner)?,
                None => return Err(PatternError::UnclosedGroup(self.source.to_string())),
            }
        }
    }

    fn token(&mut self, c: char, out: &mut String) -> Result<(), PatternError> {
        match c {
            '*' => out.push_str("(.*)"),
            ':' => {
                let mut name = String::new();
                while let Some(&n) = self.chars.peek() {
                    if n.is_alphanumeric() || n == '_' {
                        name.push(n);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    return Err(PatternError::MissingName(self.source.to_string()));
                }
                let segment = if self.chars.peek() == Some(&'(') {
                    self.chars.next();
                    self.regex_group()?
                } else {
                    "[^/]+?".to_string()
                };
                let modifier = self.modifier();
                // `/:id?` makes the leading slash optional too
                if !modifier.is_empty() && out.ends_with('/') {
                    out.pop();
                    out.push_str(&format!("(?:/({segment})){modifier}"));
                } else {
                    out.push_str(&format!("({segment}){modifier}"));
                }
            }
            '(' => {
                let inner = self.regex_group()?;
                out.push_str(&format!("({inner}){}", self.modifier()));
            }
            '\\' => {
                if let Some(escaped) = self.chars.next() {
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
        Ok(())
    }

    fn regex_group(&mut self) -> Result<String, PatternError> {
        let mut depth = 1usize;
        let mut inner = String::new();
        while let Some(c) = self.chars.next() {
            match c {
                '\\' => {
                    inner.push(c);
                    if let Some(next) = self.chars.next() {
                        inner.push(next);
                    }
                    continue;
                }
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(inner);
                    }
                }
                _ => {}
            }
            inner.push(c);
        }
        Err(PatternError::UnclosedRegex(self.source.to_string()))
    }

    fn modifier(&mut self) -> &'static str {
        match self.chars.peek() {
            Some('?') => {
                self.chars.next();
                "?"
            }
            Some('*') => {
                self.chars.next();
                "*"
            }
            Some('+') => {
                self.chars.next();
                "+"
            }
            _ => "",
        }
    }
}
