//! Round-trip-preserving config file model.
//!
//! Grammar: `#` or `;` comments to end of line, blank lines,
//! `[section]` ... `[end]` blocks, and `name = value` assignments where
//! the value may be double-quoted to include spaces. Parsing keeps
//! every line verbatim so that tools can edit a subset of entries and
//! write the file back without reformatting anything they did not
//! touch.

use std::io::Write;
use std::path::Path;

use crate::error::{self, Result};
use crate::options::OptionSchema;
use crate::options::OptionValues;

use snafu::ResultExt;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Line {
    Blank(String),
    Comment(String),
    SectionBegin { name: String, raw: String },
    SectionEnd { raw: String },
    Value { name: String, value: String, raw: String },
    Unknown(String),
}

/// A parsed config file that can be queried, mutated and written back.
#[derive(Clone, Debug, Default)]
pub struct ConfigDocument {
    lines: Vec<Line>,
}

impl ConfigDocument {
    /// Parse never fails: anything that does not match the grammar is
    /// kept as an unknown line and survives the round trip.
    pub fn parse(text: &str) -> Self {
        let lines = text.lines().map(parse_line).collect();
        ConfigDocument { lines }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).context(error::IoSnafu { path })?;
        Ok(Self::parse(&text))
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_string()).context(error::IoSnafu { path })
    }

    /// Top-level value for `name`, or a value inside `section`.
    pub fn get_value(&self, section: Option<&str>, name: &str) -> Option<&str> {
        let mut current_section: Option<&str> = None;
        for line in &self.lines {
            match line {
                Line::SectionBegin { name, .. } => current_section = Some(name),
                Line::SectionEnd { .. } => current_section = None,
                Line::Value {
                    name: value_name,
                    value,
                    ..
                } if current_section.as_deref() == section && value_name == name => {
                    return Some(value);
                }
                _ => {}
            }
        }
        None
    }

    /// Set or append an assignment, preserving everything else. A new
    /// section is appended when needed.
    pub fn set_value(&mut self, section: Option<&str>, name: &str, value: &str) {
        let raw = render_assignment(name, value);
        let mut current_section: Option<String> = None;
        let mut section_end = None;
        for (index, line) in self.lines.iter_mut().enumerate() {
            match line {
                Line::SectionBegin { name, .. } => current_section = Some(name.clone()),
                Line::SectionEnd { .. } => {
                    if current_section.as_deref() == section {
                        section_end = Some(index);
                    }
                    current_section = None;
                }
                Line::Value {
                    name: value_name, ..
                } if current_section.as_deref() == section && value_name == name => {
                    *line = Line::Value {
                        name: name.to_string(),
                        value: value.to_string(),
                        raw: raw.clone(),
                    };
                    return;
                }
                _ => {}
            }
        }

        let assignment = Line::Value {
            name: name.to_string(),
            value: value.to_string(),
            raw,
        };
        match section {
            None => self.lines.push(assignment),
            Some(section_name) => match section_end {
                Some(index) => self.lines.insert(index, assignment),
                None => {
                    self.lines.push(Line::SectionBegin {
                        name: section_name.to_string(),
                        raw: format!("[{section_name}]"),
                    });
                    self.lines.push(assignment);
                    self.lines.push(Line::SectionEnd {
                        raw: "[end]".to_string(),
                    });
                }
            },
        }
    }

    /// Delete an assignment by name; returns whether one was removed.
    pub fn remove_value(&mut self, section: Option<&str>, name: &str) -> bool {
        let mut current_section: Option<String> = None;
        let mut remove_index = None;
        for (index, line) in self.lines.iter().enumerate() {
            match line {
                Line::SectionBegin { name, .. } => current_section = Some(name.clone()),
                Line::SectionEnd { .. } => current_section = None,
                Line::Value {
                    name: value_name, ..
                } if current_section.as_deref() == section && value_name == name => {
                    remove_index = Some(index);
                    break;
                }
                _ => {}
            }
        }
        match remove_index {
            Some(index) => {
                self.lines.remove(index);
                true
            }
            None => false,
        }
    }

    /// Delete a whole `[section]` ... `[end]` block including its
    /// contents; returns whether the section existed.
    pub fn remove_section(&mut self, section: &str) -> bool {
        let mut begin = None;
        let mut depth_end = None;
        for (index, line) in self.lines.iter().enumerate() {
            match line {
                Line::SectionBegin { name, .. } if name == section && begin.is_none() => {
                    begin = Some(index);
                }
                Line::SectionEnd { .. } => {
                    if begin.is_some() {
                        depth_end = Some(index);
                        break;
                    }
                }
                _ => {}
            }
        }
        match (begin, depth_end) {
            (Some(begin), Some(end)) => {
                self.lines.drain(begin..=end);
                true
            }
            (Some(begin), None) => {
                self.lines.drain(begin..);
                true
            }
            _ => false,
        }
    }

    /// Names of all sections in order of appearance.
    pub fn sections(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::SectionBegin { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// `(name, value)` pairs inside `section`, or at top level for
    /// `None`.
    pub fn values(&self, section: Option<&str>) -> Vec<(&str, &str)> {
        let mut current_section: Option<&str> = None;
        let mut pairs = Vec::new();
        for line in &self.lines {
            match line {
                Line::SectionBegin { name, .. } => current_section = Some(name),
                Line::SectionEnd { .. } => current_section = None,
                Line::Value { name, value, .. } if current_section.as_deref() == section => {
                    pairs.push((name.as_str(), value.as_str()));
                }
                _ => {}
            }
        }
        pairs
    }

    /// Feed every top-level assignment through the option schema.
    /// Diagnostics are single lines on `sink`; returns overall success.
    pub fn apply(
        &self,
        schema: &OptionSchema,
        values: &mut OptionValues,
        sink: &mut dyn Write,
    ) -> bool {
        let mut ok = true;
        for (name, value) in self.values(None) {
            ok &= schema.set_value(name, Some(value), values, sink);
        }
        ok
    }
}

impl std::fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            let raw = match line {
                Line::Blank(raw)
                | Line::Comment(raw)
                | Line::Unknown(raw) => raw,
                Line::SectionBegin { raw, .. }
                | Line::SectionEnd { raw }
                | Line::Value { raw, .. } => raw,
            };
            writeln!(f, "{raw}")?;
        }
        Ok(())
    }
}

fn parse_line(raw: &str) -> Line {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Line::Blank(raw.to_string());
    }
    if trimmed.starts_with('#') || trimmed.starts_with(';') {
        return Line::Comment(raw.to_string());
    }
    if trimmed == "[end]" {
        return Line::SectionEnd {
            raw: raw.to_string(),
        };
    }
    if let Some(name) = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    {
        return Line::SectionBegin {
            name: name.trim().to_string(),
            raw: raw.to_string(),
        };
    }
    if let Some((name, value)) = trimmed.split_once('=') {
        let name = name.trim();
        if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
            return Line::Value {
                name: name.to_string(),
                value: unquote(value.trim()),
                raw: raw.to_string(),
            };
        }
    }
    Line::Unknown(raw.to_string())
}

fn unquote(value: &str) -> String {
    let inner = value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'));
    match inner {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        None => value.to_string(),
    }
}

fn render_assignment(name: &str, value: &str) -> String {
    if value.is_empty() || value.contains(' ') || value.contains('"') {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("{name} = \"{escaped}\"")
    } else {
        format!("{name} = {value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const SAMPLE: &str = indoc! {r#"
        # barrow configuration
        ; alternative comment style

        archive-size = 2M
        compress-algorithm = zip9
        greeting = "hello world"

        [job-nightly]
        schedule = 00:30
        [end]

        !! this line matches nothing
    "#};

    #[test]
    fn round_trip_preserves_everything() {
        let document = ConfigDocument::parse(SAMPLE);
        assert_eq!(document.to_string(), SAMPLE);
    }

    #[test]
    fn values_are_found_and_unquoted() {
        let document = ConfigDocument::parse(SAMPLE);
        assert_eq!(document.get_value(None, "archive-size"), Some("2M"));
        assert_eq!(document.get_value(None, "greeting"), Some("hello world"));
        assert_eq!(
            document.get_value(Some("job-nightly"), "schedule"),
            Some("00:30")
        );
        assert_eq!(document.get_value(None, "schedule"), None);
    }

    #[test]
    fn mutation_touches_only_the_edited_line() {
        let mut document = ConfigDocument::parse(SAMPLE);
        document.set_value(None, "archive-size", "4G");
        let text = document.to_string();
        assert!(text.contains("archive-size = 4G"));
        assert!(text.contains("# barrow configuration"));
        assert!(text.contains("!! this line matches nothing"));
        assert!(text.contains("compress-algorithm = zip9"));
    }

    #[test]
    fn set_value_appends_into_section() {
        let mut document = ConfigDocument::parse(SAMPLE);
        document.set_value(Some("job-nightly"), "enabled", "yes");
        let text = document.to_string();
        let section_at = text.find("[job-nightly]").unwrap();
        let value_at = text.find("enabled = yes").unwrap();
        let end_at = text.find("[end]").unwrap();
        assert!(section_at < value_at && value_at < end_at);
    }

    #[test]
    fn set_value_creates_missing_section() {
        let mut document = ConfigDocument::parse("");
        document.set_value(Some("job-weekly"), "enabled", "yes");
        assert_eq!(
            document.get_value(Some("job-weekly"), "enabled"),
            Some("yes")
        );
        let text = document.to_string();
        assert!(text.contains("[job-weekly]"));
        assert!(text.contains("[end]"));
    }

    #[test]
    fn remove_value_and_section() {
        let mut document = ConfigDocument::parse(SAMPLE);
        assert!(document.remove_value(None, "greeting"));
        assert!(!document.remove_value(None, "greeting"));
        assert!(document.remove_section("job-nightly"));
        let text = document.to_string();
        assert!(!text.contains("greeting"));
        assert!(!text.contains("[job-nightly]"));
        assert!(!text.contains("schedule"));
        assert!(text.contains("archive-size = 2M"));
    }

    #[test]
    fn quoted_values_round_trip_through_set() {
        let mut document = ConfigDocument::parse("");
        document.set_value(None, "pre-command", "sh -c 'echo hi'");
        let reparsed = ConfigDocument::parse(&document.to_string());
        assert_eq!(
            reparsed.get_value(None, "pre-command"),
            Some("sh -c 'echo hi'")
        );
    }
}
