//! Path templates with named placeholders.
//!
//! A pattern such as `results/{sample}/split/{file}.fa` matches a concrete
//! path when the whole path (anchored at both ends) fits the template. By
//! default a placeholder matches one or more characters other than `/`;
//! `{name,REGEX}` replaces that with an explicit constraint, which is also how
//! a placeholder is allowed to span path separators (`{path,.+}`).
//! `{{` and `}}` are literal braces.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use satflow_types::{Result, SatflowError};

const DEFAULT_CONSTRAINT: &str = "[^/]+";

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// Placeholder name → concrete value for one rule instantiation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Binding(BTreeMap<String, String>);

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Two bindings are compatible when they agree on every shared name.
    pub fn is_compatible(&self, other: &Binding) -> bool {
        self.0
            .iter()
            .all(|(k, v)| other.0.get(k).map_or(true, |o| o == v))
    }

    /// Union of two compatible bindings, `None` if they disagree.
    pub fn merge(&self, other: &Binding) -> Option<Binding> {
        if !self.is_compatible(other) {
            return None;
        }
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Some(Binding(merged))
    }

    /// Keep only the given names.
    pub fn restrict<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Binding {
        let mut out = BTreeMap::new();
        for name in names {
            if let Some(v) = self.0.get(name) {
                out.insert(name.to_string(), v.clone());
            }
        }
        Binding(out)
    }

    /// Values joined with `.`, path separators flattened. Used for default
    /// log and benchmark file names.
    pub fn slug(&self) -> String {
        self.0
            .values()
            .map(|v| v.replace(['/', '\\'], "_"))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&parts.join(","))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Binding {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Binding(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ---------------------------------------------------------------------------
// Pattern
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder { name: String },
}

/// A compiled path template.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
    regex: Regex,
    /// Capture group `g{i}` binds `groups[i]`.
    groups: Vec<String>,
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Pattern {}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |message: String| SatflowError::InvalidPattern {
            pattern: raw.to_string(),
            message,
        };

        let mut segments = Vec::new();
        let mut groups = Vec::new();
        let mut expr = String::from("^");
        let mut literal = String::new();
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(invalid("unmatched '}'".into())),
                '{' => {
                    // Read to the matching close brace; constraints may nest braces.
                    let mut depth = 1;
                    let mut body = String::new();
                    for c in chars.by_ref() {
                        match c {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        body.push(c);
                    }
                    if depth != 0 {
                        return Err(invalid("unterminated placeholder".into()));
                    }
                    let (name, constraint) = match body.split_once(',') {
                        Some((n, r)) => (n.trim(), r.trim()),
                        None => (body.trim(), DEFAULT_CONSTRAINT),
                    };
                    if !is_identifier(name) {
                        return Err(invalid(format!("invalid placeholder name '{name}'")));
                    }
                    if constraint.is_empty() {
                        return Err(invalid(format!("empty constraint for '{name}'")));
                    }
                    if !literal.is_empty() {
                        expr.push_str(&regex::escape(&literal));
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    expr.push_str(&format!("(?P<g{}>{})", groups.len(), constraint));
                    groups.push(name.to_string());
                    segments.push(Segment::Placeholder {
                        name: name.to_string(),
                    });
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            expr.push_str(&regex::escape(&literal));
            segments.push(Segment::Literal(literal));
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            raw: raw.to_string(),
            segments,
            regex,
            groups,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Distinct placeholder names, in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.groups
            .iter()
            .filter(|n| seen.insert(n.as_str()))
            .map(String::as_str)
            .collect()
    }

    pub fn has_placeholders(&self) -> bool {
        !self.groups.is_empty()
    }

    /// Anchored match of `path` against this template.
    ///
    /// A placeholder used more than once must capture the same value at
    /// every occurrence.
    pub fn matches(&self, path: &str) -> Option<Binding> {
        let caps = self.regex.captures(path)?;
        let mut binding = Binding::new();
        for (i, name) in self.groups.iter().enumerate() {
            let value = caps.name(&format!("g{i}"))?.as_str();
            match binding.get(name) {
                Some(existing) if existing != value => return None,
                Some(_) => {}
                None => binding.insert(name.clone(), value),
            }
        }
        Some(binding)
    }

    /// Substitute every placeholder from `binding`.
    pub fn instantiate(&self, binding: &Binding) -> Result<String> {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Placeholder { name } => {
                    let value =
                        binding
                            .get(name)
                            .ok_or_else(|| SatflowError::UnboundPlaceholder {
                                pattern: self.raw.clone(),
                                placeholder: name.clone(),
                            })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Free-function surface
// ---------------------------------------------------------------------------

/// Match a concrete path against a pattern; `None` means no match.
pub fn match_path(pattern: &Pattern, concrete_path: &str) -> Option<Binding> {
    pattern.matches(concrete_path)
}

/// Instantiate a pattern, failing on any placeholder the binding omits.
pub fn instantiate(pattern: &Pattern, binding: &Binding) -> Result<String> {
    pattern.instantiate(binding)
}

/// List `directory` recursively and collect the bindings of every entry whose
/// path relative to `directory` matches `pattern`.
pub fn discover(directory: &Path, pattern: &Pattern) -> Result<BTreeSet<Binding>> {
    let mut found = BTreeSet::new();
    walk(directory, "", pattern, &mut found)?;
    tracing::debug!(
        dir = %directory.display(),
        pattern = %pattern,
        matches = found.len(),
        "Discovered checkpoint entries"
    );
    Ok(found)
}

fn walk(dir: &Path, prefix: &str, pattern: &Pattern, found: &mut BTreeSet<Binding>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            tracing::warn!(path = %entry.path().display(), "Skipping non UTF-8 entry");
            continue;
        };
        let rel = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        if let Some(binding) = pattern.matches(&rel) {
            found.insert(binding);
        }
        if entry.file_type()?.is_dir() {
            walk(&entry.path(), &rel, pattern, found)?;
        }
    }
    Ok(())
}
