// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `$name` placeholder substitution for assembly templates.
//!
//! Placeholders are `$name` or `${name}`, where a name starts with a letter
//! or underscore and continues with letters, digits and underscores. `$$`
//! produces a literal `$`.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("line {line}: no value for placeholder ${name}")]
    UnknownPlaceholder { line: usize, name: String },
    #[error("line {line}: invalid placeholder")]
    InvalidPlaceholder { line: usize },
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace every placeholder in `template` with its value from `values`.
pub fn substitute(template: &str, values: &HashMap<&str, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let line = template[..template.len() - rest.len() + pos].matches('\n').count() + 1;
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
            continue;
        } else if let Some(braced) = after.strip_prefix('{') {
            let end = braced
                .find('}')
                .ok_or(TemplateError::InvalidPlaceholder { line })?;
            (&braced[..end], end + 2)
        } else {
            let end = after
                .find(|c: char| !is_name_char(c))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        if !name.starts_with(is_name_start) || !name.chars().all(is_name_char) {
            return Err(TemplateError::InvalidPlaceholder { line });
        }
        let value = values
            .get(name)
            .ok_or_else(|| TemplateError::UnknownPlaceholder {
                line,
                name: name.to_string(),
            })?;
        out.push_str(value);
        rest = &after[consumed..];
    }

    out.push_str(rest);
    Ok(out)
}
