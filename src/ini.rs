//! INI documents with duplicate-key support.
//!
//! The game engine's configuration files repeat keys (`Paths=...` lines,
//! `PlayerProperties=(...)` entries), so a plain map-based INI library does
//! not fit. Sections and keys keep insertion order; repeated keys collapse
//! into an ordered list.

use std::fs;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IniError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("config path {0} does not point to a file")]
    NotAFile(String),
}

/// A single INI value. Values that look like booleans (`yes`/`true`/`on`,
/// `no`/`false`/`off`, case-insensitive) are coerced on read; repeated keys
/// become `List`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IniValue {
    Str(String),
    Bool(bool),
    List(Vec<String>),
}

impl IniValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The value as a list of raw strings, regardless of shape.
    pub fn as_list(&self) -> Vec<String> {
        match self {
            Self::Str(s) => vec![s.clone()],
            Self::Bool(b) => vec![format_bool(*b)],
            Self::List(items) => items.clone(),
        }
    }

    fn push(&mut self, raw: String) {
        match self {
            Self::List(items) => items.push(raw),
            other => {
                let first = match other {
                    Self::Str(s) => s.clone(),
                    Self::Bool(b) => format_bool(*b),
                    Self::List(_) => unreachable!(),
                };
                *other = Self::List(vec![first, raw]);
            }
        }
    }
}

impl From<&str> for IniValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for IniValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for IniValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

fn format_bool(value: bool) -> String {
    if value { "True" } else { "False" }.to_string()
}

fn coerce(raw: &str) -> IniValue {
    match raw.to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" => IniValue::Bool(true),
        "no" | "false" | "off" => IniValue::Bool(false),
        _ => IniValue::Str(raw.to_string()),
    }
}

/// One `[section]` with its key/value entries in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniSection {
    pub name: String,
    entries: Vec<(String, IniValue)>,
}

impl IniSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&IniValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(IniValue::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(IniValue::as_bool)
    }

    /// Replaces the value of `key`, appending the key if new.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<IniValue>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Appends `raw` as an additional value under `key`, collapsing into a
    /// list when the key already exists.
    pub fn append(&mut self, key: impl Into<String>, raw: impl Into<String>) {
        let key = key.into();
        let raw = raw.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1.push(raw);
        } else {
            self.entries.push((key, coerce(&raw)));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

/// An INI document: ordered sections of ordered, possibly repeated keys.
///
/// Keys appearing before any `[section]` header are discarded, matching the
/// behaviour of the game engine's own reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: Vec<IniSection>,
}

impl IniDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, IniError> {
        if path.exists() && !path.is_file() {
            return Err(IniError::NotAFile(path.display().to_string()));
        }
        let bytes = fs::read(path).map_err(|source| IniError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(&decode(&bytes)))
    }

    /// Parses `input`. Malformed lines are skipped rather than rejected;
    /// the writer re-normalises the file on the next `save`.
    pub fn parse(input: &str) -> Self {
        let mut doc = Self::new();
        let mut current: Option<usize> = None;

        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                if let Some(name) = rest.strip_suffix(']') {
                    let name = name.trim();
                    if !name.is_empty() {
                        doc.sections.push(IniSection::new(name));
                        current = Some(doc.sections.len() - 1);
                    }
                    continue;
                }
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let Some(idx) = current else {
                // Key outside any section: discard.
                continue;
            };
            doc.sections[idx].append(key.trim(), value.trim());
        }

        doc
    }

    pub fn save(&self, path: &Path) -> Result<(), IniError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|source| IniError::Write {
                    path: path.display().to_string(),
                    source,
                })?;
            }
        }
        fs::write(path, self.render()).map_err(|source| IniError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// Renders the document: sections in insertion order, one line per list
    /// element, a blank line after each section.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for (key, value) in &section.entries {
                match value {
                    IniValue::List(items) => {
                        for item in items {
                            out.push_str(key);
                            out.push('=');
                            out.push_str(item);
                            out.push('\n');
                        }
                    }
                    IniValue::Str(s) => {
                        out.push_str(key);
                        out.push('=');
                        out.push_str(s);
                        out.push('\n');
                    }
                    IniValue::Bool(b) => {
                        out.push_str(key);
                        out.push('=');
                        out.push_str(&format_bool(*b));
                        out.push('\n');
                    }
                }
            }
            out.push('\n');
        }
        out
    }

    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut IniSection> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    /// Returns the named section, creating it if absent.
    pub fn ensure_section(&mut self, name: &str) -> &mut IniSection {
        let idx = match self.sections.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                self.sections.push(IniSection::new(name));
                self.sections.len() - 1
            }
        };
        &mut self.sections[idx]
    }

    pub fn push_section(&mut self, section: IniSection) {
        self.sections.push(section);
    }

    pub fn sections(&self) -> impl Iterator<Item = &IniSection> {
        self.sections.iter()
    }
}

/// Decodes raw file bytes: BOM-aware UTF-8 preferred, byte-frequency
/// inference as the fallback for files the DS wrote in a legacy codepage.
fn decode(bytes: &[u8]) -> String {
    let bytes = bytes
        .strip_prefix(b"\xef\xbb\xbf")
        .unwrap_or(bytes);

    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[URL]\nPort=7777\n\n[Core.System]\nPaths=../../../Astro/Content\nPaths=../../../Engine/Content\n\n[SystemSettings]\nnet.AllowEncryption=False\n\n";

    #[test]
    fn parses_sections_and_scalar_values() {
        let doc = IniDocument::parse(SAMPLE);
        let url = doc.section("URL").unwrap();
        assert_eq!(url.get_str("Port"), Some("7777"));
    }

    #[test]
    fn repeated_keys_collapse_into_ordered_list() {
        let doc = IniDocument::parse(SAMPLE);
        let core = doc.section("Core.System").unwrap();
        assert_eq!(
            core.get("Paths"),
            Some(&IniValue::List(vec![
                "../../../Astro/Content".to_string(),
                "../../../Engine/Content".to_string(),
            ]))
        );
    }

    #[test]
    fn boolean_words_are_coerced_case_insensitively() {
        for word in ["yes", "TRUE", "On"] {
            let doc = IniDocument::parse(&format!("[S]\nk={word}\n"));
            assert_eq!(doc.section("S").unwrap().get_bool("k"), Some(true));
        }
        for word in ["no", "False", "OFF"] {
            let doc = IniDocument::parse(&format!("[S]\nk={word}\n"));
            assert_eq!(doc.section("S").unwrap().get_bool("k"), Some(false));
        }
    }

    #[test]
    fn keys_without_a_section_are_discarded() {
        let doc = IniDocument::parse("orphan=1\n[S]\nk=v\n");
        assert_eq!(doc.sections().count(), 1);
        assert_eq!(doc.section("S").unwrap().get_str("k"), Some("v"));
    }

    #[test]
    fn render_emits_blank_line_after_each_section() {
        let doc = IniDocument::parse(SAMPLE);
        let rendered = doc.render();
        assert!(rendered.contains("[URL]\nPort=7777\n\n"));
        assert!(rendered.ends_with("\n\n"));
    }

    #[test]
    fn roundtrip_is_stable_after_one_pass() {
        // write(read(f)) == write(read(write(read(f))))
        let first = IniDocument::parse(SAMPLE).render();
        let second = IniDocument::parse(&first).render();
        assert_eq!(first, second);
    }

    #[test]
    fn set_replaces_append_accumulates() {
        let mut doc = IniDocument::new();
        let section = doc.ensure_section("S");
        section.set("k", "a");
        section.set("k", "b");
        assert_eq!(section.get_str("k"), Some("b"));
        section.append("k", "c");
        assert_eq!(
            section.get("k"),
            Some(&IniValue::List(vec!["b".to_string(), "c".to_string()]))
        );
    }

    #[test]
    fn decodes_utf8_with_bom() {
        let mut bytes = b"\xef\xbb\xbf[S]\nk=v\n".to_vec();
        let doc = IniDocument::parse(&decode(&bytes));
        assert_eq!(doc.section("S").unwrap().get_str("k"), Some("v"));
        // Latin-1 fallback goes through the detector.
        bytes = b"[S]\nk=caf\xe9\n".to_vec();
        let doc = IniDocument::parse(&decode(&bytes));
        assert_eq!(doc.section("S").unwrap().get_str("k"), Some("caf\u{e9}"));
    }
}
