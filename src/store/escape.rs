// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delimiter escaping for list-shaped partitions.
//!
//! Fields are joined with `;`. Inside a field, `;` and `|` are prefixed with
//! the escape byte `|`. Decoding turns `|;` into `;` and `||` into `|`; a `|`
//! followed by anything else is kept as-is, so any input decodes without
//! error and every escaped field decodes back to its original text.

use std::collections::BTreeMap;

/// Field delimiter.
pub const DELIMITER: char = ';';
/// Escape prefix.
pub const ESCAPE: char = '|';

/// Escapes a single field.
#[must_use]
pub fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        if c == DELIMITER || c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

/// Joins fields into one delimited, escaped string.
#[must_use]
pub fn join_fields<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(|f| escape(f.as_ref()))
        .collect::<Vec<_>>()
        .join(";")
}

/// Splits a delimited string back into its unescaped fields.
///
/// An empty input has no fields.
#[must_use]
pub fn split_fields(input: &str) -> Vec<String> {
    if input.is_empty() {
        return Vec::new();
    }

    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ESCAPE => match chars.peek() {
                Some(&next) if next == DELIMITER || next == ESCAPE => {
                    current.push(next);
                    chars.next();
                }
                _ => current.push(ESCAPE),
            },
            DELIMITER => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}

/// Encodes a string map as `key;value;key;value`.
#[must_use]
pub fn encode_map(map: &BTreeMap<String, String>) -> String {
    let fields: Vec<&str> = map
        .iter()
        .flat_map(|(k, v)| [k.as_str(), v.as_str()])
        .collect();
    join_fields(&fields)
}

/// Decodes a `key;value;key;value` string.
///
/// A trailing key without a value is dropped.
#[must_use]
pub fn decode_map(input: &str) -> BTreeMap<String, String> {
    let fields = split_fields(input);
    fields
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect()
}
