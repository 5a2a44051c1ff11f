//! Tag sets and their delimiter-joined storage encoding
//!
//! Tags are stored in a single TEXT column, joined with a separator and
//! wrapped on both ends (`,a,b,`). The wrapping makes `LIKE '%,tag,%'`
//! queries exact. An empty set is stored as the lone separator.
//!
//! The separator defaults to [`DEFAULT_TAG_SEP`] and is configurable per
//! store. A [`Tags`] value carries the separator its members were
//! sanitized against.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Separator used to join tags unless configured otherwise
pub const DEFAULT_TAG_SEP: char = ',';

/// Replacement for a separator found inside a tag value
const SEP_REPLACEMENT: &str = "--";

/// Whether `sep` can be used to join tags
///
/// The separator must survive sanitizing, so it cannot be part of the
/// replacement, whitespace or alphanumeric.
pub fn is_valid_separator(sep: char) -> bool {
    !(sep.is_alphanumeric() || sep.is_whitespace() || SEP_REPLACEMENT.contains(sep))
}

/// An ordered, duplicate-free set of tags
///
/// Every tag held by this type has already been sanitized against its
/// separator, so the separator never appears inside a stored value.
/// Deserialized sets go through the same sanitizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Tags {
    sep: char,
    set: BTreeSet<String>,
}

impl Default for Tags {
    fn default() -> Self {
        Self::with_separator(DEFAULT_TAG_SEP)
    }
}

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty set joined with `sep`
    pub fn with_separator(sep: char) -> Self {
        Self {
            sep,
            set: BTreeSet::new(),
        }
    }

    /// Build a tag set from raw values, sanitizing each one
    ///
    /// Empty and whitespace-only values are dropped.
    pub fn from_raw<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        set.extend(tags);
        set
    }

    /// Parse the stored representation using the default separator
    pub fn parse(encoded: &str) -> Self {
        Self::parse_with(encoded, DEFAULT_TAG_SEP)
    }

    /// Parse the stored representation, dropping empty parts
    pub fn parse_with(encoded: &str, sep: char) -> Self {
        Self {
            sep,
            set: encoded
                .split(sep)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn separator(&self) -> char {
        self.sep
    }

    /// Re-encode for another separator, sanitizing every value against it
    pub fn with_sep(self, sep: char) -> Self {
        if sep == self.sep {
            return self;
        }
        let mut out = Self::with_separator(sep);
        out.extend(self.set);
        out
    }

    /// Insert a single tag after sanitizing it
    pub fn insert(&mut self, tag: &str) -> bool {
        let tag = sanitize(tag.trim(), self.sep);
        if tag.is_empty() {
            return false;
        }
        self.set.insert(tag)
    }

    /// Insert every value of `tags`, sanitizing each one
    pub fn extend<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for tag in tags {
            self.insert(tag.as_ref());
        }
    }

    /// Union-merge another set into this one
    pub fn merge(&mut self, other: &Tags) {
        if other.sep == self.sep {
            self.set.extend(other.set.iter().cloned());
        } else {
            self.extend(other.iter());
        }
    }

    /// Return the union of two sets without touching either
    ///
    /// The result keeps this set's separator.
    pub fn merged(&self, other: &Tags) -> Tags {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.set.contains(tag)
    }

    pub fn is_superset(&self, other: &Tags) -> bool {
        self.set.is_superset(&other.set)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.set.iter().map(String::as_str)
    }

    fn joined(&self) -> String {
        let mut buf = [0u8; 4];
        let sep: &str = self.sep.encode_utf8(&mut buf);
        self.set.iter().cloned().collect::<Vec<_>>().join(sep)
    }

    /// Stored representation: sorted, joined and wrapped with the separator
    pub fn wrapped(&self) -> String {
        delim_wrap(&self.joined(), self.sep)
    }
}

impl<S: AsRef<str>> FromIterator<S> for Tags {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Tags::from_raw(iter)
    }
}

impl From<Vec<String>> for Tags {
    fn from(tags: Vec<String>) -> Self {
        Tags::from_raw(tags)
    }
}

impl From<Tags> for Vec<String> {
    fn from(tags: Tags) -> Self {
        tags.set.into_iter().collect()
    }
}

impl std::fmt::Display for Tags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.joined())
    }
}

/// Replace the separator inside a tag value so it cannot split on read
pub fn sanitize(tag: &str, sep: char) -> String {
    tag.replace(sep, SEP_REPLACEMENT)
}

/// Wrap a joined tag string with the separator on both ends
///
/// Blank input yields the lone separator. Already wrapped input is
/// returned unchanged.
pub fn delim_wrap(token: &str, sep: char) -> String {
    if token.trim().is_empty() {
        return sep.to_string();
    }

    let mut out = String::with_capacity(token.len() + 2);
    if !token.starts_with(sep) {
        out.push(sep);
    }
    out.push_str(token);
    if !token.ends_with(sep) {
        out.push(sep);
    }
    out
}
