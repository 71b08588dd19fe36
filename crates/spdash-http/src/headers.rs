//! Header map.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use spdash_common::headers::CONTENT_LENGTH;

use crate::error::FramingError;

/// Case-sensitive header map. Encoding order is sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Display) {
        self.0.insert(name.into(), value.to_string());
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Parse a header value. Absent and unparsable values both yield `None`.
    pub fn get_parsed<T: FromStr>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Declared body length. Absent means zero for this protocol.
    pub fn content_length(&self) -> Result<Option<u64>, FramingError> {
        match self.get(CONTENT_LENGTH) {
            None => Ok(None),
            Some(v) => v
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| FramingError::InvalidContentLength(v.to_string())),
        }
    }

    /// Parse one `Name: value` line. Only the single separator space is
    /// dropped; the rest of the value is kept as sent.
    pub(crate) fn parse_line(&mut self, line: &str) -> Result<(), FramingError> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FramingError::MalformedHeader(line.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(FramingError::MalformedHeader(line.to_string()));
        }
        let value = value.strip_prefix(' ').unwrap_or(value);
        self.0.insert(name.to_string(), unescape_value(value).into_owned());
        Ok(())
    }
}

/// Wire form of a header value: `%`, CR and LF are percent-encoded so a
/// value can never end the line it sits on.
pub(crate) fn escape_value(value: &str) -> Cow<'_, str> {
    if !value.contains(['%', '\r', '\n']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            '\r' => out.push_str("%0D"),
            '\n' => out.push_str("%0A"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Inverse of [`escape_value`]. Unknown `%` sequences are kept verbatim.
pub(crate) fn unescape_value(value: &str) -> Cow<'_, str> {
    if !value.contains('%') {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let escaped = &rest[pos..];
        let decoded = match escaped.get(..3) {
            Some("%25") => Some('%'),
            Some("%0D" | "%0d") => Some('\r'),
            Some("%0A" | "%0a") => Some('\n'),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &escaped[3..];
            }
            None => {
                out.push('%');
                rest = &escaped[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

impl<K: Into<String>, V: Display> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}
