//! Help text rendering for the option schema.
//!
//! Two columns: `-x|--name` plus a type hint on the left, the wrapped
//! description on the right, followed by the default value when it is
//! meaningful and a bulleted choice list for selects and sets.

use std::io::Write;

use super::{DeprecatedTarget, OptionDef, OptionKind};

pub(super) fn render(defs: &[OptionDef], out: &mut dyn Write) {
    let left_columns: Vec<String> = defs.iter().map(left_column).collect();
    let width = left_columns.iter().map(|column| column.len()).max().unwrap_or(0);

    for (def, left) in defs.iter().zip(&left_columns) {
        let mut lines = def.help.lines();
        let first = lines.next().unwrap_or("");
        let _ = writeln!(out, "{left:<width$} - {first}");
        for line in lines {
            let _ = writeln!(out, "{:<width$}   {line}", "");
        }
        if let Some(default) = def.default {
            if !matches!(default, "" | "0" | "no") {
                let _ = writeln!(out, "{:<width$}   (default: {default})", "");
            }
        }
        match &def.kind {
            OptionKind::Select { choices } => {
                for (name, _) in choices.iter() {
                    let _ = writeln!(out, "{:<width$}     * {name}", "");
                }
            }
            OptionKind::Set { choices } => {
                for (name, _) in choices.iter() {
                    let _ = writeln!(out, "{:<width$}     * {name}", "");
                }
            }
            _ => {}
        }
    }
}

fn left_column(def: &OptionDef) -> String {
    let mut column = String::from(" ");
    match def.short {
        Some(short) => {
            column.push('-');
            column.push(short);
            column.push('|');
        }
        None => column.push_str("   "),
    }
    column.push_str("--");
    column.push_str(def.name);
    column.push_str(&type_hint(&def.kind));
    column
}

fn type_hint(kind: &OptionKind) -> String {
    match kind {
        OptionKind::Integer { units, .. } | OptionKind::Integer64 { units, .. } => {
            if units.is_empty() {
                "=<n>".to_string()
            } else {
                let names: Vec<&str> = units.iter().map(|(name, _)| *name).collect();
                format!("=<n>[{}]", names.join("|"))
            }
        }
        OptionKind::Double { .. } => "=<n>".to_string(),
        OptionKind::Boolean | OptionKind::Flag { .. } => "[=yes|no]".to_string(),
        OptionKind::Increment { .. } | OptionKind::Enum { .. } => String::new(),
        OptionKind::Select { .. } => "=<name>".to_string(),
        OptionKind::Set { .. } => "=<name>[,<name>...]".to_string(),
        OptionKind::String => "=<string>".to_string(),
        OptionKind::Special { hint, .. } => format!("={hint}"),
        OptionKind::Deprecated { target, .. } => match target {
            DeprecatedTarget::Forward(_) => String::new(),
            DeprecatedTarget::Parse(_) => String::new(),
        },
    }
}
