//! Ordered entry pattern lists for include/exclude matching.
//!
//! Each entry compiles its pattern once at insertion; matching walks
//! the list in order and returns on the first hit. Glob patterns are
//! translated to anchored regular expressions; backslash separators in
//! Windows-style input are doubled before compilation so they stay
//! literal.

use regex::Regex;

/// What an entry selects for storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Image,
}

/// Dialect the pattern source is written in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatternKind {
    Glob,
    Regex,
    ExtendedRegex,
}

/// How much of the candidate path has to match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchMode {
    /// Match anywhere in the path.
    Any,
    /// Match a prefix of the path.
    Begin,
    /// Match the whole path.
    Exact,
}

#[derive(Clone, Debug)]
pub struct Entry {
    pub id: u64,
    pub kind: EntryKind,
    pub pattern_kind: PatternKind,
    pub source: String,
    matcher: Matcher,
}

#[derive(Clone, Debug)]
struct Matcher {
    any: Regex,
    begin: Regex,
    exact: Regex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternError {
    pub source_pattern: String,
    pub reason: String,
}

impl std::fmt::Display for PatternError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cannot compile pattern '{}': {}",
            self.source_pattern, self.reason
        )
    }
}

impl std::error::Error for PatternError {}

impl Entry {
    pub fn matches(&self, path: &str, mode: MatchMode) -> bool {
        match mode {
            MatchMode::Any => self.matcher.any.is_match(path),
            MatchMode::Begin => self.matcher.begin.is_match(path),
            MatchMode::Exact => self.matcher.exact.is_match(path),
        }
    }

    /// Longest directory prefix of the pattern source that contains no
    /// pattern metacharacters. The continuous watcher roots its watch
    /// tree here.
    pub fn base_directory(&self) -> &str {
        let source = self.source.as_str();
        let meta = match self.pattern_kind {
            PatternKind::Glob => &['*', '?', '['][..],
            PatternKind::Regex | PatternKind::ExtendedRegex => {
                &['*', '?', '[', '(', '{', '.', '+', '^', '$', '|', '\\'][..]
            }
        };
        let cut = source.find(|c| meta.contains(&c)).unwrap_or(source.len());
        match source[..cut].rfind('/') {
            Some(0) => "/",
            Some(index) => &source[..index],
            None => "",
        }
    }
}

/// Ordered list of compiled entry patterns.
#[derive(Clone, Debug, Default)]
pub struct EntryList {
    entries: Vec<Entry>,
    next_id: u64,
}

impl EntryList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and append a pattern; returns its id.
    pub fn append(
        &mut self,
        kind: EntryKind,
        pattern_kind: PatternKind,
        source: &str,
    ) -> Result<u64, PatternError> {
        let matcher = compile(pattern_kind, source)?;
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            kind,
            pattern_kind,
            source: source.to_string(),
            matcher,
        });
        Ok(id)
    }

    pub fn remove(&mut self, id: u64) -> bool {
        match self.entries.iter().position(|entry| entry.id == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Whether any entry matches `path` under `mode`.
    pub fn matches(&self, path: &str, mode: MatchMode) -> bool {
        self.entries.iter().any(|entry| entry.matches(path, mode))
    }

    /// First entry matching `path` under `mode`.
    pub fn find(&self, path: &str, mode: MatchMode) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.matches(path, mode))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn compile(pattern_kind: PatternKind, source: &str) -> Result<Matcher, PatternError> {
    // Windows separators become literal backslashes.
    let escaped = source.replace('\\', "\\\\");
    let core = match pattern_kind {
        PatternKind::Glob => glob_to_regex(&escaped),
        PatternKind::Regex | PatternKind::ExtendedRegex => escaped,
    };
    let build = |text: String| {
        Regex::new(&text).map_err(|error| PatternError {
            source_pattern: source.to_string(),
            reason: error.to_string(),
        })
    };
    Ok(Matcher {
        any: build(format!("(?:{core})"))?,
        begin: build(format!("^(?:{core})"))?,
        exact: build(format!("^(?:{core})$"))?,
    })
}

/// Translate a glob to regex source: `*` matches any run, `?` one
/// character, everything else literally.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(pattern_kind: PatternKind, source: &str) -> EntryList {
        let mut list = EntryList::new();
        list.append(EntryKind::File, pattern_kind, source).unwrap();
        list
    }

    #[test]
    fn glob_star_matches_within_tree() {
        let list = list_of(PatternKind::Glob, "/home/*/docs");
        assert!(list.matches("/home/alice/docs", MatchMode::Exact));
        assert!(!list.matches("/home/alice/music", MatchMode::Exact));
    }

    #[test]
    fn glob_question_mark_matches_one_character() {
        let list = list_of(PatternKind::Glob, "file.?");
        assert!(list.matches("file.a", MatchMode::Exact));
        assert!(!list.matches("file.ab", MatchMode::Exact));
    }

    #[test]
    fn match_modes_differ() {
        let list = list_of(PatternKind::Glob, "/tmp/w");
        assert!(list.matches("/tmp/w/file", MatchMode::Begin));
        assert!(!list.matches("/tmp/w/file", MatchMode::Exact));
        assert!(list.matches("x/tmp/w", MatchMode::Any));
    }

    #[test]
    fn regex_dialect_is_used_directly() {
        let list = list_of(PatternKind::Regex, "/var/log/[a-z]+\\.log");
        assert!(list.matches("/var/log/syslog.log", MatchMode::Exact));
        assert!(!list.matches("/var/log/123.log", MatchMode::Exact));
    }

    #[test]
    fn first_matching_entry_wins() {
        let mut list = EntryList::new();
        let first = list
            .append(EntryKind::File, PatternKind::Glob, "/a/*")
            .unwrap();
        let _second = list
            .append(EntryKind::Image, PatternKind::Glob, "/a/b")
            .unwrap();
        assert_eq!(list.find("/a/b", MatchMode::Exact).unwrap().id, first);
    }

    #[test]
    fn windows_separators_stay_literal() {
        let list = list_of(PatternKind::Glob, "C:\\Users\\*");
        assert!(list.matches("C:\\Users\\bob", MatchMode::Exact));
    }

    #[test]
    fn base_directory_strips_pattern_tail() {
        let mut list = EntryList::new();
        list.append(EntryKind::File, PatternKind::Glob, "/tmp/w/*")
            .unwrap();
        let entry = list.iter().next().unwrap();
        assert_eq!(entry.base_directory(), "/tmp/w");

        let mut list = EntryList::new();
        list.append(EntryKind::File, PatternKind::Glob, "/var/data")
            .unwrap();
        assert_eq!(list.iter().next().unwrap().base_directory(), "/var");

        let mut list = EntryList::new();
        list.append(EntryKind::File, PatternKind::Glob, "/*").unwrap();
        assert_eq!(list.iter().next().unwrap().base_directory(), "/");
    }

    #[test]
    fn bad_regex_is_reported() {
        let mut list = EntryList::new();
        let error = list
            .append(EntryKind::File, PatternKind::Regex, "([unclosed")
            .unwrap_err();
        assert_eq!(error.source_pattern, "([unclosed");
    }

    #[test]
    fn remove_by_id() {
        let mut list = EntryList::new();
        let id = list
            .append(EntryKind::File, PatternKind::Glob, "/a/*")
            .unwrap();
        assert!(list.remove(id));
        assert!(!list.remove(id));
        assert!(list.is_empty());
    }
}
