//! Dump script parsing and patching.
//!
//! Statements are split with a small scanner that understands quoting and
//! comments, then classified with anchored regexes.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Restorable tables, children first. Rows are cleared in this order.
pub const RESTORE_TABLES: &[&str] = &[
    "EventLink",
    "EventTag",
    "EventDepartment",
    "Event",
    "Tag",
    "Department",
    "User",
    "Role",
];

/// Audit tables describe restores themselves and are never replayed.
pub const AUDIT_TABLES: &[&str] = &["BackupHistory", "RestoreOperation"];

/// Migration bookkeeping tables.
pub const BOOKKEEPING_TABLES: &[&str] = &["django_migrations", "_sqlx_migrations"];

static INSERT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)^\s*INSERT\s+INTO\s+((?:"(?:[^"]|"")*"|[A-Za-z_][A-Za-z0-9_$]*)(?:\s*\.\s*(?:"(?:[^"]|"")*"|[A-Za-z_][A-Za-z0-9_$]*))?)"#,
    )
    .unwrap_or_else(|e| unreachable!("insert pattern is valid: {e}"))
});

static NAME_PART_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""((?:[^"]|"")*)"|([A-Za-z_][A-Za-z0-9_$]*)"#)
        .unwrap_or_else(|e| unreachable!("name pattern is valid: {e}"))
});

static SETTING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*(?:SET\s|SELECT\s+(?:pg_catalog\s*\.\s*)?set_config\s*\()")
        .unwrap_or_else(|e| unreachable!("setting pattern is valid: {e}"))
});

static SETVAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*SELECT\s+(?:pg_catalog\s*\.\s*)?setval\s*\(\s*(?:'((?:[^']|'')*)')?")
        .unwrap_or_else(|e| unreachable!("setval pattern is valid: {e}"))
});

static ON_CONFLICT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bON\s+CONFLICT\b")
        .unwrap_or_else(|e| unreachable!("on conflict pattern is valid: {e}"))
});

// =============================================================================
// Scanner
// =============================================================================

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// End of a `'…'` or `"…"` token starting at `start`; doubled quotes escape.
fn delimited_end(bytes: &[u8], start: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash_escapes && b == b'\\' {
            i += 2;
            continue;
        }
        if b == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// End of a `$tag$` opener starting at `start`.
fn dollar_tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    match bytes.get(i) {
        Some(b'$') => return Some(i + 1),
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => {}
        _ => return None,
    }
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    (bytes.get(i) == Some(&b'$')).then_some(i + 1)
}

/// End of the quoted token (string, identifier, dollar body) starting at `i`.
fn quoted_end(bytes: &[u8], i: usize) -> Option<usize> {
    let before = |n: usize| i.checked_sub(n).map(|p| bytes[p]);
    match bytes[i] {
        b'\'' => {
            let escapes = matches!(before(1), Some(b'E' | b'e'))
                && !before(2).is_some_and(is_ident_byte);
            Some(delimited_end(bytes, i, b'\'', escapes))
        }
        b'"' => Some(delimited_end(bytes, i, b'"', false)),
        b'$' if !before(1).is_some_and(is_ident_byte) => {
            let tag_end = dollar_tag_end(bytes, i)?;
            let tag = &bytes[i..tag_end];
            let close = bytes[tag_end..]
                .windows(tag.len())
                .position(|w| w == tag)
                .map(|p| tag_end + p + tag.len());
            Some(close.unwrap_or(bytes.len()))
        }
        _ => None,
    }
}

fn block_comment_end(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

fn push_statement(statements: &mut Vec<String>, current: &mut Vec<u8>) {
    let text = String::from_utf8_lossy(current);
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

/// Split a script into statements without their terminating `;`.
///
/// Comments and psql meta-command lines (`\restrict …`) are dropped.
#[must_use]
pub fn split_statements(script: &str) -> Vec<String> {
    let bytes = script.as_bytes();
    let mut statements = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    let mut at_line_start = true;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if at_line_start && b == b'\\' && current.iter().all(u8::is_ascii_whitespace) {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }

        if b == b'-' && bytes.get(i + 1) == Some(&b'-') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }

        if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i = block_comment_end(bytes, i);
            current.push(b' ');
            continue;
        }

        if let Some(end) = quoted_end(bytes, i) {
            current.extend_from_slice(&bytes[i..end]);
            i = end;
            at_line_start = false;
            continue;
        }

        if b == b';' {
            push_statement(&mut statements, &mut current);
            i += 1;
            at_line_start = false;
            continue;
        }

        current.push(b);
        if b == b'\n' {
            at_line_start = true;
        } else if b != b' ' && b != b'\t' && b != b'\r' {
            at_line_start = false;
        }
        i += 1;
    }

    push_statement(&mut statements, &mut current);
    statements
}

/// Replace the contents of quoted tokens with spaces, keeping byte offsets.
fn mask_quoted(statement: &str) -> String {
    let bytes = statement.as_bytes();
    let mut masked = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match quoted_end(bytes, i) {
            Some(end) => {
                masked.extend(std::iter::repeat(b' ').take(end - i));
                i = end;
            }
            None => {
                masked.push(if bytes[i] < 0x80 { bytes[i] } else { b' ' });
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&masked).into_owned()
}

// =============================================================================
// Classification
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    /// Row insert into `table` (unquoted, schema dropped)
    Insert { table: String },
    /// `SET …` or `set_config(…)`
    SessionSetting,
    /// `SELECT setval('seq', …)` with the sequence name normalized like a
    /// table name; empty when the first argument is not a string literal
    SequenceValue { sequence: String },
    Other,
}

/// Last component of a possibly schema-qualified name. Unquoted names fold
/// to lower case.
fn normalize_table(qualified: &str) -> String {
    NAME_PART_RE
        .captures_iter(qualified)
        .last()
        .map(|caps| match (caps.get(1), caps.get(2)) {
            (Some(quoted), _) => quoted.as_str().replace("\"\"", "\""),
            (None, Some(bare)) => bare.as_str().to_lowercase(),
            (None, None) => String::new(),
        })
        .unwrap_or_default()
}

#[must_use]
pub fn classify(statement: &str) -> StatementKind {
    if let Some(caps) = INSERT_RE.captures(statement) {
        let table = caps.get(1).map_or("", |m| m.as_str());
        return StatementKind::Insert {
            table: normalize_table(table),
        };
    }
    if SETTING_RE.is_match(statement) {
        return StatementKind::SessionSetting;
    }
    if let Some(caps) = SETVAL_RE.captures(statement) {
        let literal = caps.get(1).map_or("", |m| m.as_str()).replace("''", "'");
        return StatementKind::SequenceValue {
            sequence: normalize_table(&literal),
        };
    }
    StatementKind::Other
}

/// Table owning a sequence named `{table}_{column}_seq`. The longest
/// known table name wins, so `EventLink_…` never resolves to `Event`.
#[must_use]
pub fn sequence_table(sequence: &str) -> Option<&'static str> {
    if !sequence.ends_with("_seq") {
        return None;
    }
    RESTORE_TABLES
        .iter()
        .chain(AUDIT_TABLES)
        .chain(BOOKKEEPING_TABLES)
        .filter(|table| {
            sequence
                .strip_prefix(**table)
                .is_some_and(|rest| rest.starts_with('_'))
        })
        .max_by_key(|table| table.len())
        .copied()
}

/// Make an insert idempotent by appending `ON CONFLICT DO NOTHING`.
#[must_use]
pub fn patch_insert(statement: &str) -> String {
    let statement = statement.trim().trim_end_matches(';').trim_end();
    if ON_CONFLICT_RE.is_match(&mask_quoted(statement)) {
        return statement.to_string();
    }
    format!("{statement} ON CONFLICT DO NOTHING")
}

// =============================================================================
// RestorePlan
// =============================================================================

/// Statements dropped from a plan, by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipCounts {
    pub settings: usize,
    pub audit: usize,
    pub bookkeeping: usize,
    /// Inserts into unknown tables and any other statement
    pub other: usize,
}

impl SkipCounts {
    #[must_use]
    pub fn total(&self) -> usize {
        self.settings + self.audit + self.bookkeeping + self.other
    }
}

/// What a restore will replay.
#[derive(Debug, Clone, Default)]
pub struct RestorePlan {
    /// Patched inserts and sequence updates, in script order
    pub statements: Vec<String>,
    pub inserts: usize,
    pub sequence_updates: usize,
    /// Tables that receive at least one row
    pub tables: BTreeSet<String>,
    pub skipped: SkipCounts,
}

impl RestorePlan {
    #[must_use]
    pub fn from_script(script: &str) -> Self {
        let mut plan = Self::default();

        for statement in split_statements(script) {
            match classify(&statement) {
                StatementKind::Insert { table } => {
                    if RESTORE_TABLES.contains(&table.as_str()) {
                        plan.statements.push(patch_insert(&statement));
                        plan.inserts += 1;
                        plan.tables.insert(table);
                    } else if AUDIT_TABLES.contains(&table.as_str()) {
                        plan.skipped.audit += 1;
                    } else if BOOKKEEPING_TABLES.contains(&table.as_str()) {
                        plan.skipped.bookkeeping += 1;
                    } else {
                        tracing::debug!(table = %table, "skipping insert into unknown table");
                        plan.skipped.other += 1;
                    }
                }
                StatementKind::SequenceValue { sequence } => match sequence_table(&sequence) {
                    Some(table) if RESTORE_TABLES.contains(&table) => {
                        plan.statements.push(statement);
                        plan.sequence_updates += 1;
                    }
                    Some(table) if AUDIT_TABLES.contains(&table) => plan.skipped.audit += 1,
                    Some(table) if BOOKKEEPING_TABLES.contains(&table) => {
                        plan.skipped.bookkeeping += 1;
                    }
                    _ => {
                        tracing::debug!(sequence = %sequence, "skipping update of unknown sequence");
                        plan.skipped.other += 1;
                    }
                },
                StatementKind::SessionSetting => plan.skipped.settings += 1,
                StatementKind::Other => plan.skipped.other += 1,
            }
        }

        assert_eq!(
            plan.statements.len(),
            plan.inserts + plan.sequence_updates,
            "every planned statement is an insert or a sequence update"
        );
        plan
    }
}
