//! # Config Patcher
//!
//! Line-oriented `key = value` rewriting for generated node configuration.
//!
//! The patcher never parses the file. Each line is tested against every rule
//! with an anchored prefix check: a rule for `key` matches when the line, with
//! `" = "` appended, starts with `key`. A matching line is replaced wholesale by
//! `"<key> = <value>"`; every other line is copied byte for byte.
//!
//! Consequences of the anchored check that callers rely on:
//! - leading whitespace never matches (`"  moniker = x"` is left alone)
//! - a key also matches longer keys it prefixes (`moniker` hits `monikers = 1`)
//! - rules are evaluated against the line as rewritten so far, so overlapping
//!   keys give an unspecified result
//!
//! Output always ends each line with `\n`, whatever the input used.

use crate::types::{NodeprepError, RuleSet};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Separator between key and value, both when matching and when writing.
pub const ASSIGNMENT_SEPARATOR: &str = " = ";

/// Summary of one patch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchReport {
    /// Number of lines scanned.
    pub lines: usize,
    /// Lines rewritten, by the key whose rule produced the final line.
    pub replaced: BTreeMap<String, usize>,
}

impl PatchReport {
    /// Total number of rewritten lines.
    pub fn replaced_total(&self) -> usize {
        self.replaced.values().sum()
    }

    /// Keys from `rules` that did not rewrite any line.
    pub fn unmatched_keys<'a>(&self, rules: &'a RuleSet) -> Vec<&'a str> {
        rules
            .iter()
            .map(|(key, _)| key)
            .filter(|key| !self.replaced.contains_key(*key))
            .collect()
    }
}

/// True when `line + " = "` starts with `key`.
///
/// Evaluated without allocating the concatenation.
pub fn line_matches(line: &[u8], key: &str) -> bool {
    let key = key.as_bytes();
    if key.len() <= line.len() {
        line.starts_with(key)
    } else {
        key.starts_with(line) && ASSIGNMENT_SEPARATOR.as_bytes().starts_with(&key[line.len()..])
    }
}

/// Split `input` into lines the way the config reader sees them.
///
/// Lines end at `\n`; one trailing `\r` is dropped. A trailing `\n` does not
/// start an extra empty line, and empty input has no lines.
fn lines(input: &[u8]) -> impl Iterator<Item = &[u8]> {
    let body = input.strip_suffix(b"\n").unwrap_or(input);
    let count = if input.is_empty() { 0 } else { usize::MAX };

    body.split(|b| *b == b'\n')
        .take(count)
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

/// Apply `rules` to `input`, returning the rewritten bytes and a report.
pub fn patch_text(input: &[u8], rules: &RuleSet) -> (Vec<u8>, PatchReport) {
    let mut output = Vec::with_capacity(input.len() + 1);
    let mut report = PatchReport::default();

    for original in lines(input) {
        let mut line = Cow::Borrowed(original);
        let mut winner: Option<&str> = None;

        for (key, value) in rules.iter() {
            if line_matches(&line, key) {
                line = Cow::Owned(format!("{key}{ASSIGNMENT_SEPARATOR}{value}").into_bytes());
                winner = Some(key);
            }
        }

        if let Some(key) = winner {
            *report.replaced.entry(key.to_string()).or_insert(0) += 1;
        }

        report.lines += 1;
        output.extend_from_slice(&line);
        output.push(b'\n');
    }

    (output, report)
}

/// Rewrite the config file at `path` in place.
///
/// The whole file is read before the target is truncated, but the write
/// itself is not atomic: a failure after truncation can leave the file short.
/// No locking is performed.
///
/// # Errors
///
/// Returns `NodeprepError::Io` if the file cannot be read, reopened for
/// writing, or written.
pub fn patch_config(path: &Path, rules: &RuleSet) -> Result<PatchReport, NodeprepError> {
    let input = std::fs::read(path)?;
    let (output, report) = patch_text(&input, rules);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(&output)?;
    file.flush()?;

    tracing::debug!(
        "Patched {:?}: {} lines, {} replaced",
        path,
        report.lines,
        report.replaced_total()
    );

    Ok(report)
}

// =============================================================================
// TESTS
// =============================================================================
