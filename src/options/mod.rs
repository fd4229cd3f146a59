//! Declarative command-line and config-file option schema.
//!
//! One ordered table of [`OptionDef`]s drives argv parsing, config-file
//! assignment and help rendering. Options carry a numeric priority so
//! parsing can run in two passes: early options (the config file path)
//! are read first, the config file applies, then the remaining options
//! override it.

mod help;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::Write;

/// Options parsed before the config file loads.
pub const PRIORITY_EARLY: u32 = 0;
/// Options parsed after the config file has been applied.
pub const PRIORITY_NORMAL: u32 = 1;

/// Factor-1024 size suffixes.
pub const BYTE_UNITS: &[(&str, i64)] = &[
    ("K", 1 << 10),
    ("M", 1 << 20),
    ("G", 1 << 30),
    ("T", 1 << 40),
];

/// Custom parser hook for `OptionKind::Special`.
pub type SpecialParser =
    fn(option: &str, value: Option<&str>, values: &mut OptionValues) -> Result<(), String>;

pub enum DeprecatedTarget {
    /// Re-dispatch to the named option.
    Forward(&'static str),
    /// Run a custom parser.
    Parse(SpecialParser),
}

pub enum OptionKind {
    Integer {
        min: i64,
        max: i64,
        units: &'static [(&'static str, i64)],
    },
    Integer64 {
        min: i64,
        max: i64,
        units: &'static [(&'static str, i64)],
    },
    Double {
        min: f64,
        max: f64,
    },
    Boolean,
    /// Presence ORs `mask` into the target; `=no` clears it.
    Flag {
        mask: u64,
    },
    /// Counts occurrences up to `max`.
    Increment {
        max: i64,
    },
    /// Presence stores `value` under the shared `group` key.
    Enum {
        group: &'static str,
        value: i64,
    },
    /// Mutually exclusive named choice.
    Select {
        choices: &'static [(&'static str, i64)],
    },
    /// Comma-separated named choices OR-ed into a bitmask.
    Set {
        choices: &'static [(&'static str, u64)],
    },
    String,
    Special {
        parse: SpecialParser,
        hint: &'static str,
    },
    Deprecated {
        target: DeprecatedTarget,
        note: &'static str,
    },
}

pub struct OptionDef {
    pub name: &'static str,
    pub short: Option<char>,
    pub kind: OptionKind,
    pub priority: u32,
    /// Textual default, applied through the same parser.
    pub default: Option<&'static str>,
    pub help: &'static str,
}

/// Parsed option values, keyed by option name (or enum group).
#[derive(Clone, Debug, Default)]
pub struct OptionValues {
    values: HashMap<&'static str, OptionValue>,
    positionals: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Flag(u64),
    Increment(i64),
    Enum(i64),
    Select(i64),
    Set(u64),
    String(String),
}

impl OptionValues {
    pub fn integer(&self, name: &str) -> i64 {
        match self.values.get(name) {
            Some(OptionValue::Integer(value)) => *value,
            other => panic!("option '{name}' is not an integer: {other:?}"),
        }
    }

    pub fn double(&self, name: &str) -> f64 {
        match self.values.get(name) {
            Some(OptionValue::Double(value)) => *value,
            other => panic!("option '{name}' is not a double: {other:?}"),
        }
    }

    pub fn boolean(&self, name: &str) -> bool {
        match self.values.get(name) {
            Some(OptionValue::Boolean(value)) => *value,
            other => panic!("option '{name}' is not a boolean: {other:?}"),
        }
    }

    pub fn flag(&self, name: &str) -> u64 {
        match self.values.get(name) {
            Some(OptionValue::Flag(value)) => *value,
            other => panic!("option '{name}' is not a flag: {other:?}"),
        }
    }

    pub fn increment(&self, name: &str) -> i64 {
        match self.values.get(name) {
            Some(OptionValue::Increment(value)) => *value,
            other => panic!("option '{name}' is not an increment: {other:?}"),
        }
    }

    pub fn enum_value(&self, group: &str) -> i64 {
        match self.values.get(group) {
            Some(OptionValue::Enum(value)) => *value,
            other => panic!("enum group '{group}' is missing: {other:?}"),
        }
    }

    pub fn select(&self, name: &str) -> i64 {
        match self.values.get(name) {
            Some(OptionValue::Select(value)) => *value,
            other => panic!("option '{name}' is not a select: {other:?}"),
        }
    }

    pub fn set(&self, name: &str) -> u64 {
        match self.values.get(name) {
            Some(OptionValue::Set(value)) => *value,
            other => panic!("option '{name}' is not a set: {other:?}"),
        }
    }

    pub fn string(&self, name: &str) -> &str {
        match self.values.get(name) {
            Some(OptionValue::String(value)) => value,
            other => panic!("option '{name}' is not a string: {other:?}"),
        }
    }

    pub fn positionals(&self) -> &[String] {
        &self.positionals
    }

    /// Store a value directly; used by `Special` parser callbacks.
    pub fn store(&mut self, name: &'static str, value: OptionValue) {
        self.values.insert(name, value);
    }
}

/// Schema construction failure: duplicate names, dangling deprecation
/// targets. These are programmer mistakes surfaced at startup.
#[derive(Debug, PartialEq, Eq)]
pub struct SchemaError(String);

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid option schema: {}", self.0)
    }
}

impl std::error::Error for SchemaError {}

pub struct OptionSchema {
    defs: &'static [OptionDef],
    max_priority: u32,
}

impl OptionSchema {
    pub fn new(defs: &'static [OptionDef]) -> Result<Self, SchemaError> {
        let mut names = HashSet::new();
        let mut shorts = HashSet::new();
        for def in defs {
            if !names.insert(def.name) {
                return Err(SchemaError(format!("duplicate option name '{}'", def.name)));
            }
            if let Some(short) = def.short {
                if !shorts.insert(short) {
                    return Err(SchemaError(format!("duplicate short option '-{short}'")));
                }
            }
            if let OptionKind::Deprecated {
                target: DeprecatedTarget::Forward(target),
                ..
            } = &def.kind
            {
                if !defs.iter().any(|other| other.name == *target) {
                    return Err(SchemaError(format!(
                        "deprecated option '{}' forwards to unknown option '{target}'",
                        def.name
                    )));
                }
            }
        }
        let max_priority = defs.iter().map(|def| def.priority).max().unwrap_or(0);
        Ok(OptionSchema { defs, max_priority })
    }

    pub fn defs(&self) -> &'static [OptionDef] {
        self.defs
    }

    pub fn max_priority(&self) -> u32 {
        self.max_priority
    }

    /// Fresh value store with every default applied.
    pub fn values(&self) -> OptionValues {
        let mut values = OptionValues::default();
        for def in self.defs {
            let initial = match &def.kind {
                OptionKind::Integer { .. } | OptionKind::Integer64 { .. } => {
                    OptionValue::Integer(0)
                }
                OptionKind::Double { .. } => OptionValue::Double(0.0),
                OptionKind::Boolean => OptionValue::Boolean(false),
                OptionKind::Flag { .. } => OptionValue::Flag(0),
                OptionKind::Increment { .. } => OptionValue::Increment(0),
                OptionKind::Enum { group, .. } => {
                    values.values.entry(*group).or_insert(OptionValue::Enum(0));
                    continue;
                }
                OptionKind::Select { .. } => OptionValue::Select(0),
                OptionKind::Set { .. } => OptionValue::Set(0),
                OptionKind::String => OptionValue::String(String::new()),
                OptionKind::Special { .. } | OptionKind::Deprecated { .. } => continue,
            };
            values.values.insert(def.name, initial);
        }
        for def in self.defs {
            if let Some(default) = def.default {
                let mut sink = Vec::new();
                let applied = self.process(def, def.name, Some(default), &mut values, &mut sink);
                assert!(
                    applied,
                    "invalid default '{default}' for option '{}': {}",
                    def.name,
                    String::from_utf8_lossy(&sink).trim()
                );
            }
        }
        values
    }

    fn find_long(&self, name: &str) -> Option<&'static OptionDef> {
        self.defs.iter().find(|def| def.name == name)
    }

    fn find_short(&self, short: char) -> Option<&'static OptionDef> {
        self.defs.iter().find(|def| def.short == Some(short))
    }

    /// Parse argv-style arguments, applying only options whose priority
    /// lies in `min_priority..=max_priority`. Positional arguments are
    /// collected when the range covers the schema's final pass. One
    /// descriptive line per failure goes to `sink`; returns overall
    /// success.
    pub fn parse_args(
        &self,
        args: &[String],
        min_priority: u32,
        max_priority: u32,
        values: &mut OptionValues,
        sink: &mut dyn Write,
    ) -> bool {
        let collect_positionals = max_priority >= self.max_priority;
        if collect_positionals {
            values.positionals.clear();
        }

        let mut ok = true;
        let mut options_done = false;
        let mut index = 0;
        while index < args.len() {
            let arg = &args[index];
            index += 1;

            if options_done || arg == "-" || !arg.starts_with('-') {
                if collect_positionals {
                    values.positionals.push(arg.clone());
                }
                continue;
            }
            if arg == "--" {
                options_done = true;
                continue;
            }

            if let Some(long) = arg.strip_prefix("--") {
                let (name, mut value) = match long.split_once('=') {
                    Some((name, value)) => (name, Some(value)),
                    None => (long, None),
                };
                let Some(def) = self.find_long(name) else {
                    let _ = writeln!(sink, "Unknown option '--{name}'!");
                    ok = false;
                    continue;
                };
                if value.is_none() && self.requires_value(def) {
                    match args.get(index) {
                        Some(next) => {
                            value = Some(next.as_str());
                            index += 1;
                        }
                        None => {
                            let _ = writeln!(sink, "No value given for option '--{name}'!");
                            ok = false;
                            continue;
                        }
                    }
                }
                if def.priority >= min_priority && def.priority <= max_priority {
                    ok &= self.process(def, &format!("--{name}"), value, values, sink);
                }
            } else {
                // Short options may be concatenated until one of them
                // takes a value.
                let cluster = &arg[1..];
                let mut chars = cluster.char_indices();
                while let Some((offset, short)) = chars.next() {
                    let Some(def) = self.find_short(short) else {
                        let _ = writeln!(sink, "Unknown option '-{short}'!");
                        ok = false;
                        break;
                    };
                    let mut value = None;
                    let mut consumed_rest = false;
                    if self.requires_value(def) {
                        let rest = &cluster[offset + short.len_utf8()..];
                        if !rest.is_empty() {
                            value = Some(rest);
                            consumed_rest = true;
                        } else {
                            match args.get(index) {
                                Some(next) => {
                                    value = Some(next.as_str());
                                    index += 1;
                                }
                                None => {
                                    let _ =
                                        writeln!(sink, "No value given for option '-{short}'!");
                                    ok = false;
                                    break;
                                }
                            }
                        }
                    }
                    if def.priority >= min_priority && def.priority <= max_priority {
                        ok &= self.process(def, &format!("-{short}"), value, values, sink);
                    }
                    if consumed_rest {
                        break;
                    }
                }
            }
        }
        ok
    }

    /// Apply one `name = value` assignment, e.g. from the config file.
    pub fn set_value(
        &self,
        name: &str,
        value: Option<&str>,
        values: &mut OptionValues,
        sink: &mut dyn Write,
    ) -> bool {
        match self.find_long(name) {
            Some(def) => self.process(def, name, value, values, sink),
            None => {
                let _ = writeln!(sink, "Unknown option '{name}'!");
                false
            }
        }
    }

    pub fn print_help(&self, out: &mut dyn Write) {
        help::render(self.defs, out);
    }

    fn requires_value(&self, def: &OptionDef) -> bool {
        match &def.kind {
            OptionKind::Integer { .. }
            | OptionKind::Integer64 { .. }
            | OptionKind::Double { .. }
            | OptionKind::Select { .. }
            | OptionKind::Set { .. }
            | OptionKind::String
            | OptionKind::Special { .. } => true,
            OptionKind::Boolean
            | OptionKind::Flag { .. }
            | OptionKind::Increment { .. }
            | OptionKind::Enum { .. } => false,
            OptionKind::Deprecated { target, .. } => match target {
                DeprecatedTarget::Forward(name) => self
                    .find_long(name)
                    .map(|target| self.requires_value(target))
                    .unwrap_or(false),
                DeprecatedTarget::Parse(_) => false,
            },
        }
    }

    fn process(
        &self,
        def: &OptionDef,
        option: &str,
        value: Option<&str>,
        values: &mut OptionValues,
        sink: &mut dyn Write,
    ) -> bool {
        match &def.kind {
            OptionKind::Integer { min, max, units } | OptionKind::Integer64 { min, max, units } => {
                let raw = value.unwrap_or_default();
                match parse_integer(raw, units) {
                    Ok(parsed) => {
                        if parsed < *min || parsed > *max {
                            let _ = writeln!(
                                sink,
                                "Value '{raw}' out of range {min}..{max} for option '{option}'!"
                            );
                            return false;
                        }
                        values.values.insert(def.name, OptionValue::Integer(parsed));
                        true
                    }
                    Err(reason) => {
                        let _ = writeln!(
                            sink,
                            "Cannot parse value '{raw}' for option '{option}': {reason}!"
                        );
                        false
                    }
                }
            }
            OptionKind::Double { min, max } => {
                let raw = value.unwrap_or_default();
                match raw.trim().parse::<f64>() {
                    Ok(parsed) if parsed >= *min && parsed <= *max => {
                        values.values.insert(def.name, OptionValue::Double(parsed));
                        true
                    }
                    Ok(_) => {
                        let _ = writeln!(
                            sink,
                            "Value '{raw}' out of range {min}..{max} for option '{option}'!"
                        );
                        false
                    }
                    Err(_) => {
                        let _ =
                            writeln!(sink, "Cannot parse value '{raw}' for option '{option}'!");
                        false
                    }
                }
            }
            OptionKind::Boolean => match parse_boolean(value) {
                Ok(parsed) => {
                    values.values.insert(def.name, OptionValue::Boolean(parsed));
                    true
                }
                Err(raw) => {
                    let _ = writeln!(sink, "Cannot parse value '{raw}' for option '{option}'!");
                    false
                }
            },
            OptionKind::Flag { mask } => match parse_boolean(value) {
                Ok(set) => {
                    let current = match values.values.get(def.name) {
                        Some(OptionValue::Flag(current)) => *current,
                        _ => 0,
                    };
                    let merged = if set { current | mask } else { current & !mask };
                    values.values.insert(def.name, OptionValue::Flag(merged));
                    true
                }
                Err(raw) => {
                    let _ = writeln!(sink, "Cannot parse value '{raw}' for option '{option}'!");
                    false
                }
            },
            OptionKind::Increment { max } => {
                let current = match values.values.get(def.name) {
                    Some(OptionValue::Increment(current)) => *current,
                    _ => 0,
                };
                values
                    .values
                    .insert(def.name, OptionValue::Increment((current + 1).min(*max)));
                true
            }
            OptionKind::Enum { group, value } => {
                values.values.insert(*group, OptionValue::Enum(*value));
                true
            }
            OptionKind::Select { choices } => {
                let raw = value.unwrap_or_default();
                match choices.iter().find(|(name, _)| *name == raw) {
                    Some((_, selected)) => {
                        values
                            .values
                            .insert(def.name, OptionValue::Select(*selected));
                        true
                    }
                    None => {
                        let _ =
                            writeln!(sink, "Unknown value '{raw}' for option '{option}'!");
                        false
                    }
                }
            }
            OptionKind::Set { choices } => {
                let raw = value.unwrap_or_default();
                let mut merged = match values.values.get(def.name) {
                    Some(OptionValue::Set(current)) => *current,
                    _ => 0,
                };
                for token in raw.split(',').filter(|token| !token.is_empty()) {
                    match choices.iter().find(|(name, _)| *name == token) {
                        Some((_, bit)) => merged |= bit,
                        None => {
                            let _ = writeln!(
                                sink,
                                "Unknown value '{token}' for option '{option}'!"
                            );
                            return false;
                        }
                    }
                }
                values.values.insert(def.name, OptionValue::Set(merged));
                true
            }
            OptionKind::String => {
                let raw = value.unwrap_or_default();
                values
                    .values
                    .insert(def.name, OptionValue::String(raw.to_string()));
                true
            }
            OptionKind::Special { parse, .. } => match parse(option, value, values) {
                Ok(()) => true,
                Err(reason) => {
                    let _ = writeln!(
                        sink,
                        "Cannot process value '{}' for option '{option}': {reason}!",
                        value.unwrap_or_default()
                    );
                    false
                }
            },
            OptionKind::Deprecated { target, note } => {
                let _ = writeln!(sink, "Warning: option '{option}' is deprecated, {note}!");
                match target {
                    DeprecatedTarget::Forward(name) => {
                        let target = self
                            .find_long(name)
                            .expect("deprecation target validated at schema init");
                        self.process(target, option, value, values, sink)
                    }
                    DeprecatedTarget::Parse(parse) => match parse(option, value, values) {
                        Ok(()) => true,
                        Err(reason) => {
                            let _ = writeln!(
                                sink,
                                "Cannot process value '{}' for option '{option}': {reason}!",
                                value.unwrap_or_default()
                            );
                            false
                        }
                    },
                }
            }
        }
    }
}

fn parse_boolean(value: Option<&str>) -> Result<bool, String> {
    let Some(raw) = value else {
        return Ok(true);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "yes" | "on" | "true" => Ok(true),
        "0" | "no" | "off" | "false" => Ok(false),
        _ => Err(raw.to_string()),
    }
}

fn parse_integer(value: &str, units: &[(&str, i64)]) -> Result<i64, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("empty value".to_string());
    }
    let split = trimmed
        .char_indices()
        .find(|(index, c)| !(c.is_ascii_digit() || (*index == 0 && (*c == '-' || *c == '+'))))
        .map(|(index, _)| index)
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split);
    let base: i64 = digits
        .parse()
        .map_err(|_| format!("invalid number '{trimmed}'"))?;
    if suffix.is_empty() {
        return Ok(base);
    }
    for (name, factor) in units {
        if suffix.eq_ignore_ascii_case(name) {
            return base
                .checked_mul(*factor)
                .ok_or_else(|| format!("number '{trimmed}' overflows"));
        }
    }
    Err(format!("invalid unit '{suffix}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn special_upper(
        _option: &str,
        value: Option<&str>,
        values: &mut OptionValues,
    ) -> Result<(), String> {
        let raw = value.ok_or_else(|| "missing value".to_string())?;
        values.store(
            "special-opt",
            OptionValue::String(raw.to_ascii_uppercase()),
        );
        Ok(())
    }

    static TEST_OPTIONS: &[OptionDef] = &[
        OptionDef {
            name: "int-opt",
            short: Some('i'),
            kind: OptionKind::Integer {
                min: 0,
                max: 1 << 40,
                units: BYTE_UNITS,
            },
            priority: PRIORITY_NORMAL,
            default: None,
            help: "an integer with size units",
        },
        OptionDef {
            name: "bool-opt",
            short: Some('b'),
            kind: OptionKind::Boolean,
            priority: PRIORITY_NORMAL,
            default: None,
            help: "a boolean",
        },
        OptionDef {
            name: "set-opt",
            short: None,
            kind: OptionKind::Set {
                choices: &[("a", 1), ("b", 2), ("c", 4)],
            },
            priority: PRIORITY_NORMAL,
            default: None,
            help: "a set",
        },
        OptionDef {
            name: "select-opt",
            short: None,
            kind: OptionKind::Select {
                choices: &[("slow", 1), ("fast", 2)],
            },
            priority: PRIORITY_NORMAL,
            default: Some("slow"),
            help: "a select",
        },
        OptionDef {
            name: "verbose",
            short: Some('v'),
            kind: OptionKind::Increment { max: 6 },
            priority: PRIORITY_NORMAL,
            default: None,
            help: "increase verbosity",
        },
        OptionDef {
            name: "full",
            short: Some('f'),
            kind: OptionKind::Enum {
                group: "archive-type",
                value: 1,
            },
            priority: PRIORITY_NORMAL,
            default: None,
            help: "full archive",
        },
        OptionDef {
            name: "incremental",
            short: None,
            kind: OptionKind::Enum {
                group: "archive-type",
                value: 2,
            },
            priority: PRIORITY_NORMAL,
            default: None,
            help: "incremental archive",
        },
        OptionDef {
            name: "config",
            short: None,
            kind: OptionKind::String,
            priority: PRIORITY_EARLY,
            default: None,
            help: "config file path",
        },
        OptionDef {
            name: "special-opt",
            short: None,
            kind: OptionKind::Special {
                parse: special_upper,
                hint: "<text>",
            },
            priority: PRIORITY_NORMAL,
            default: None,
            help: "a special",
        },
        OptionDef {
            name: "old-opt",
            short: None,
            kind: OptionKind::Deprecated {
                target: DeprecatedTarget::Forward("bool-opt"),
                note: "use '--bool-opt' instead",
            },
            priority: PRIORITY_NORMAL,
            default: None,
            help: "",
        },
    ];

    fn parse(args: &[&str]) -> (bool, OptionValues, String) {
        let schema = OptionSchema::new(TEST_OPTIONS).unwrap();
        let mut values = schema.values();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let mut sink = Vec::new();
        let ok = schema.parse_args(&args, 0, schema.max_priority(), &mut values, &mut sink);
        (ok, values, String::from_utf8(sink).unwrap())
    }

    #[test]
    fn integer_with_unit_suffix() {
        let (ok, values, _) = parse(&["--int-opt=5k"]);
        assert!(ok);
        assert_eq!(values.integer("int-opt"), 5 * 1024);

        let (ok, values, _) = parse(&["--int-opt", "2M"]);
        assert!(ok);
        assert_eq!(values.integer("int-opt"), 2 * 1024 * 1024);
    }

    #[test]
    fn integer_rejects_bad_unit() {
        let (ok, _, diagnostics) = parse(&["--int-opt=5x"]);
        assert!(!ok);
        assert!(diagnostics.contains("invalid unit"));
    }

    #[test]
    fn boolean_forms() {
        for args in [&["--bool-opt=yes"][..], &["--bool-opt"][..], &["-b"][..]] {
            let (ok, values, _) = parse(args);
            assert!(ok);
            assert!(values.boolean("bool-opt"));
        }
        let (ok, values, _) = parse(&["--bool-opt=off"]);
        assert!(ok);
        assert!(!values.boolean("bool-opt"));
    }

    #[test]
    fn set_builds_bitmask() {
        let (ok, values, _) = parse(&["--set-opt=a,b"]);
        assert!(ok);
        assert_eq!(values.set("set-opt"), 3);
    }

    #[test]
    fn set_rejects_unknown_member() {
        let (ok, _, diagnostics) = parse(&["--set-opt=a,z"]);
        assert!(!ok);
        assert!(diagnostics.contains("Unknown value 'z'"));
    }

    #[test]
    fn select_uses_default_and_overrides() {
        let (ok, values, _) = parse(&[]);
        assert!(ok);
        assert_eq!(values.select("select-opt"), 1);
        let (ok, values, _) = parse(&["--select-opt=fast"]);
        assert!(ok);
        assert_eq!(values.select("select-opt"), 2);
    }

    #[test]
    fn increment_counts_occurrences() {
        let (ok, values, _) = parse(&["-vvv", "--verbose"]);
        assert!(ok);
        assert_eq!(values.increment("verbose"), 4);
    }

    #[test]
    fn enum_options_share_a_group() {
        let (_, values, _) = parse(&["--full"]);
        assert_eq!(values.enum_value("archive-type"), 1);
        let (_, values, _) = parse(&["--incremental"]);
        assert_eq!(values.enum_value("archive-type"), 2);
    }

    #[test]
    fn short_options_concatenate_until_value() {
        let (ok, values, _) = parse(&["-bvi5k"]);
        assert!(ok);
        assert!(values.boolean("bool-opt"));
        assert_eq!(values.increment("verbose"), 1);
        assert_eq!(values.integer("int-opt"), 5 * 1024);
    }

    #[test]
    fn double_dash_terminates_options() {
        let (ok, values, _) = parse(&["--bool-opt", "--", "--int-opt=5"]);
        assert!(ok);
        assert_eq!(values.positionals(), &["--int-opt=5".to_string()]);
        assert_eq!(values.integer("int-opt"), 0);
    }

    #[test]
    fn unknown_option_is_reported() {
        let (ok, _, diagnostics) = parse(&["--no-such-option"]);
        assert!(!ok);
        assert!(diagnostics.contains("Unknown option '--no-such-option'"));
    }

    #[test]
    fn special_parser_runs() {
        let (ok, values, _) = parse(&["--special-opt=abc"]);
        assert!(ok);
        assert_eq!(values.string("special-opt"), "ABC");
    }

    #[test]
    fn deprecated_forwards_with_warning() {
        let (ok, values, diagnostics) = parse(&["--old-opt"]);
        assert!(ok);
        assert!(values.boolean("bool-opt"));
        assert!(diagnostics.contains("deprecated"));
    }

    #[test]
    fn priority_ranges_gate_application() {
        let schema = OptionSchema::new(TEST_OPTIONS).unwrap();
        let mut values = schema.values();
        let args: Vec<String> = ["--config=/etc/barrow.cfg", "--bool-opt"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut sink = Vec::new();

        assert!(schema.parse_args(&args, PRIORITY_EARLY, PRIORITY_EARLY, &mut values, &mut sink));
        assert_eq!(values.string("config"), "/etc/barrow.cfg");
        assert!(!values.boolean("bool-opt"));

        assert!(schema.parse_args(
            &args,
            PRIORITY_NORMAL,
            schema.max_priority(),
            &mut values,
            &mut sink
        ));
        assert!(values.boolean("bool-opt"));
    }

    #[test]
    fn duplicate_long_name_is_rejected() {
        static DUPLICATE: &[OptionDef] = &[
            OptionDef {
                name: "twice",
                short: None,
                kind: OptionKind::Boolean,
                priority: 1,
                default: None,
                help: "",
            },
            OptionDef {
                name: "twice",
                short: None,
                kind: OptionKind::Boolean,
                priority: 1,
                default: None,
                help: "",
            },
        ];
        assert!(OptionSchema::new(DUPLICATE).is_err());
    }

    #[test]
    fn duplicate_short_name_is_rejected() {
        static DUPLICATE: &[OptionDef] = &[
            OptionDef {
                name: "one",
                short: Some('x'),
                kind: OptionKind::Boolean,
                priority: 1,
                default: None,
                help: "",
            },
            OptionDef {
                name: "two",
                short: Some('x'),
                kind: OptionKind::Boolean,
                priority: 1,
                default: None,
                help: "",
            },
        ];
        assert!(OptionSchema::new(DUPLICATE).is_err());
    }

    #[test]
    fn config_assignment_goes_through_the_same_schema() {
        let schema = OptionSchema::new(TEST_OPTIONS).unwrap();
        let mut values = schema.values();
        let mut sink = Vec::new();
        assert!(schema.set_value("int-opt", Some("1M"), &mut values, &mut sink));
        assert_eq!(values.integer("int-opt"), 1 << 20);
        assert!(!schema.set_value("bogus", Some("1"), &mut values, &mut sink));
    }
}
