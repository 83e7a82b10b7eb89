//! Shell command templates.
//!
//! `{input}`, `{output}` and their `.NAME` forms expand to shell-quoted,
//! space-joined paths. `{params.NAME}` and `{wildcards.NAME}` insert values
//! verbatim so a parameter can carry option fragments. `{threads}`,
//! `{mem_mb}`, `{log}`, `{benchmark}` and `{tmpdir}` cover the rest.
//! `{{` and `}}` are literal braces.

use std::path::{Path, PathBuf};

use serde_json::Value;

use satflow_types::{Result, SatflowError};

use crate::graph::Task;

/// Expand `template` for `task`.
pub fn render_command(template: &str, task: &Task, tmpdir: &Path) -> Result<String> {
    scan(template, |key| expand(key, task, tmpdir))
        .map_err(|e| match e {
            ScanError::Unterminated(key) => template_error(task, format!("unterminated '{{{key}'")),
            ScanError::Key(e) => e,
        })
}

/// Every `{...}` reference in `template`, in order of appearance.
pub fn template_keys(template: &str) -> std::result::Result<Vec<String>, String> {
    let mut keys = Vec::new();
    scan(template, |key| {
        keys.push(key.to_string());
        Ok(String::new())
    })
    .map_err(|e| match e {
        ScanError::Unterminated(key) => format!("unterminated '{{{key}'"),
        ScanError::Key(e) => e.to_string(),
    })?;
    Ok(keys)
}

enum ScanError {
    Unterminated(String),
    Key(SatflowError),
}

fn scan(
    template: &str,
    mut on_key: impl FnMut(&str) -> Result<String>,
) -> std::result::Result<String, ScanError> {
    let mut out = String::with_capacity(template.len() * 2);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    key.push(c);
                }
                if !closed {
                    return Err(ScanError::Unterminated(key));
                }
                out.push_str(&on_key(key.trim()).map_err(ScanError::Key)?);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn expand(key: &str, task: &Task, tmpdir: &Path) -> Result<String> {
    let (head, name) = match key.split_once('.') {
        Some((h, n)) => (h, Some(n)),
        None => (key, None),
    };
    let value = match (head, name) {
        ("input", None) => join_paths(task.input_paths()),
        ("input", Some(n)) => {
            let input = task
                .input(n)
                .ok_or_else(|| template_error(task, format!("no input named '{n}'")))?;
            join_paths(input.paths.iter())
        }
        ("output", None) => join_paths(task.output_paths()),
        ("output", Some(n)) => {
            let output = task
                .output(n)
                .ok_or_else(|| template_error(task, format!("no output named '{n}'")))?;
            shell_quote(&output.path.to_string_lossy())
        }
        ("params", Some(n)) => {
            let value = task
                .params
                .get(n)
                .ok_or_else(|| template_error(task, format!("no parameter named '{n}'")))?;
            param_to_string(value)
        }
        ("wildcards", Some(n)) => task
            .id
            .binding
            .get(n)
            .map(String::from)
            .ok_or_else(|| template_error(task, format!("no wildcard named '{n}'")))?,
        ("threads", None) => task.resources.threads.to_string(),
        ("mem_mb", None) => task.resources.mem_mb.to_string(),
        ("log", None) => shell_quote(&task.log_path.to_string_lossy()),
        ("benchmark", None) => shell_quote(&task.benchmark_path.to_string_lossy()),
        ("tmpdir", None) => shell_quote(&tmpdir.to_string_lossy()),
        _ => return Err(template_error(task, format!("unknown placeholder '{{{key}}}'"))),
    };
    Ok(value)
}

fn template_error(task: &Task, message: String) -> SatflowError {
    SatflowError::Configuration(format!("command template of {}: {message}", task.id))
}

fn join_paths<'a>(paths: impl Iterator<Item = &'a PathBuf>) -> String {
    paths
        .map(|p| shell_quote(&p.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn param_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(param_to_string).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}

/// Quote `s` for `bash` when it contains anything beyond a safe set.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./,:=+@%".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
