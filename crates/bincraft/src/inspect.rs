//! Pretty-printing and key search over parsed values.

use std::fmt::{self, Write as _};

use regex_automata::meta::Regex;
use regex_automata::{Anchored, Input};

use crate::errors::{ErrorKind, Result};
use crate::value::{Container, Value, is_private};

/// Strings and byte strings longer than this are cut short unless `full_strings` is set.
const STRING_PREVIEW: usize = 32;

/// Options for [`format_value`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrintConfig {
    /// Print long strings and byte strings in full.
    pub full_strings: bool,
    /// Include `_`-prefixed bookkeeping members.
    pub show_private: bool,
    /// Include flags that are not set.
    pub show_false_flags: bool,
}

/// Renders a value as an indented tree, one member per line.
///
/// Lazy values are resolved first; one that cannot be resolved prints as an error.
pub fn format_value(value: &Value, config: &PrintConfig) -> String {
    let mut out = String::new();
    write_value(&mut out, value, config, 0);
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("    ");
    }
}

fn write_value(out: &mut String, value: &Value, config: &PrintConfig, depth: usize) {
    match value {
        Value::None => out.push_str("None"),
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Int(n) => {
            let _ = write!(out, "{n}");
        }
        Value::Float(x) => {
            let _ = write!(out, "{x:?}");
        }
        Value::Bytes(b) => write_bytes(out, b, config),
        Value::Str(s) => write_str(out, s, config),
        Value::List(items) => write_list(out, items, config, depth),
        Value::Container(c) => write_container(out, "Container", c, config, depth, false),
        Value::Flags(c) => write_container(out, "Flags", c, config, depth, true),
        Value::LazyContainer(_) | Value::LazyList(_) => match value.force() {
            Ok(forced) => write_value(out, &forced, config, depth),
            Err(e) => {
                let _ = write!(out, "<unresolved: {e}>");
            }
        },
    }
}

fn write_bytes(out: &mut String, data: &[u8], config: &PrintConfig) {
    let shown = if config.full_strings {
        data
    } else {
        &data[..data.len().min(STRING_PREVIEW)]
    };
    out.push_str("b'");
    for b in shown {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            0x20..=0x7E => out.push(*b as char),
            _ => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out.push('\'');
    if shown.len() < data.len() {
        out.push_str("...");
    }
    let _ = write!(out, " (total {})", data.len());
}

fn write_str(out: &mut String, s: &str, config: &PrintConfig) {
    let total = s.chars().count();
    let shown: String = if config.full_strings {
        s.to_string()
    } else {
        s.chars().take(STRING_PREVIEW).collect()
    };
    let _ = write!(out, "{shown:?}");
    if total > STRING_PREVIEW && !config.full_strings {
        out.push_str("...");
    }
    let _ = write!(out, " (total {total})");
}

fn write_list(out: &mut String, items: &[Value], config: &PrintConfig, depth: usize) {
    out.push_str("ListContainer:");
    for item in items {
        out.push('\n');
        indent(out, depth + 1);
        write_value(out, item, config, depth + 1);
    }
}

fn write_container(
    out: &mut String,
    label: &str,
    c: &Container,
    config: &PrintConfig,
    depth: usize,
    flags: bool,
) {
    let _ = write!(out, "{label}:");
    for (key, value) in c.iter() {
        if is_private(key) && !config.show_private {
            continue;
        }
        if flags && !config.show_false_flags && matches!(value, Value::Bool(false)) {
            continue;
        }
        out.push('\n');
        indent(out, depth + 1);
        let _ = write!(out, "{key} = ");
        write_value(out, value, config, depth + 1);
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_value(self, &PrintConfig::default()))
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_container(&mut out, "Container", self, &PrintConfig::default(), 0, false);
        f.write_str(&out)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        ErrorKind::Expression(format!("invalid search pattern {pattern:?}: {e}"))
            .at(crate::construct::ROOT_PATH)
    })
}

/// Whether `key` matches `re` starting at its first character.
fn key_matches(re: &Regex, key: &str) -> bool {
    re.is_match(Input::new(key).anchored(Anchored::Yes))
}

/// Depth-first walk: nested containers and lists are searched, other members are
/// matched by key.
fn walk(re: &Regex, value: &Value, found: &mut Vec<Value>, first_only: bool) {
    match value {
        Value::Container(c) | Value::Flags(c) => {
            for (key, member) in c.iter() {
                if first_only && !found.is_empty() {
                    return;
                }
                match member {
                    Value::Container(_) | Value::Flags(_) | Value::List(_) => {
                        walk(re, member, found, first_only);
                    }
                    _ if key_matches(re, key) => found.push(member.clone()),
                    _ => {}
                }
            }
        }
        Value::List(items) => {
            for item in items {
                if first_only && !found.is_empty() {
                    return;
                }
                walk(re, item, found, first_only);
            }
        }
        _ => {}
    }
}

/// The first member, in depth-first order, whose key matches `pattern`.
///
/// The pattern is a regular expression anchored at the start of the key.
pub fn search(value: &Value, pattern: &str) -> Result<Option<Value>> {
    let re = compile(pattern)?;
    let mut found = Vec::new();
    walk(&re, &value.force()?, &mut found, true);
    Ok(found.into_iter().next())
}

/// Every member whose key matches `pattern`, in depth-first order.
pub fn search_all(value: &Value, pattern: &str) -> Result<Vec<Value>> {
    let re = compile(pattern)?;
    let mut found = Vec::new();
    walk(&re, &value.force()?, &mut found, false);
    Ok(found)
}
