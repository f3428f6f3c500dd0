//! Statement scanner for SQL schema files.
//!
//! [`scan`] splits a source file into top-level statements at semicolons
//! (ignoring semicolons inside parentheses, string literals, quoted
//! identifiers, comments and dollar-quoted bodies) and classifies each one.
//! Only the statement kinds the rules care about are kept:
//!
//! | Kind           | Target                                 |
//! |----------------|----------------------------------------|
//! | `CreateTable`  | the created table                      |
//! | `CreateIndex`  | the indexed table                      |
//! | `CreatePolicy` | the table the policy is attached to    |
//! | `AlterTable`   | the altered table                      |
//! | `CreateType`   | the created enum or composite type     |
//!
//! Functions, triggers, grants, DML, transaction control and other
//! recognized-but-irrelevant statements are skipped silently. Anything the
//! scanner cannot classify becomes a [`ParseWarning`], reported downstream as
//! an Info diagnostic (SCAN001). The scanner never fails.

use serde::{Deserialize, Serialize};

use crate::sql_lexer::{self, Token, TokenKind};
use crate::types::{Diagnostic, RuleCategory, Severity};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Statement kinds retained by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    CreateTable,
    CreateIndex,
    CreatePolicy,
    AlterTable,
    CreateType,
}

/// A possibly schema-qualified object name.
///
/// `name` and `schema` are folded the way Postgres folds identifiers
/// (unquoted → lowercase, quoted → verbatim). `raw` keeps the object name as
/// written, without quotes, for naming checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub schema: Option<String>,
    pub name: String,
    /// Whether the object name was double-quoted.
    pub quoted: bool,
    pub raw: String,
}

impl QualifiedName {
    /// Build an unqualified, unquoted name.
    #[must_use]
    pub fn bare(name: &str) -> Self {
        Self {
            schema: None,
            name: name.to_lowercase(),
            quoted: false,
            raw: name.to_owned(),
        }
    }

    /// `schema.name`, or just `name` when unqualified.
    #[must_use]
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Schema the object lives in, treating unqualified names as `default_schema`.
    #[must_use]
    pub fn schema_or<'a>(&'a self, default_schema: &'a str) -> &'a str {
        self.schema.as_deref().unwrap_or(default_schema)
    }

    /// Whether two names denote the same object under `default_schema`.
    #[must_use]
    pub fn same_object(&self, other: &Self, default_schema: &str) -> bool {
        self.name == other.name && self.schema_or(default_schema) == other.schema_or(default_schema)
    }
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.qualified())
    }
}

/// One classified statement. Immutable once scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaStatement {
    pub kind: StatementKind,
    pub target: QualifiedName,
    /// Statement text without the terminating semicolon.
    pub raw_text: String,
    /// 1-based line of the statement's first token.
    pub source_line: u32,
    pub file_path: String,
}

/// A statement the scanner could not classify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    pub file_path: String,
    pub line: u32,
    pub message: String,
    pub snippet: String,
}

impl ParseWarning {
    /// Convert to the Info diagnostic (SCAN001) the engine reports.
    #[must_use]
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new("SCAN001", Severity::Info, RuleCategory::Scanner, &self.message)
            .at(&self.file_path, self.line)
            .with_snippet(&self.snippet)
    }
}

/// Result of scanning one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutput {
    pub statements: Vec<SchemaStatement>,
    pub warnings: Vec<ParseWarning>,
    /// Statements recognized and intentionally ignored.
    pub skipped: u32,
}

impl ScanOutput {
    /// Total number of top-level statements seen.
    #[must_use]
    pub fn statement_count(&self) -> u32 {
        self.statements.len() as u32 + self.warnings.len() as u32 + self.skipped
    }
}

// ---------------------------------------------------------------------------
// Token cursor (shared with the schema fold)
// ---------------------------------------------------------------------------

/// Forward-only cursor over meaningful tokens.
pub(crate) struct Cursor<'t, 'a> {
    tokens: &'t [&'t Token<'a>],
    pos: usize,
}

impl<'t, 'a> Cursor<'t, 'a> {
    pub(crate) fn new(tokens: &'t [&'t Token<'a>]) -> Self {
        Self { tokens, pos: 0 }
    }

    pub(crate) fn peek(&self) -> Option<&'t Token<'a>> {
        self.tokens.get(self.pos).copied()
    }

    pub(crate) fn peek_at(&self, ahead: usize) -> Option<&'t Token<'a>> {
        self.tokens.get(self.pos + ahead).copied()
    }

    pub(crate) fn next(&mut self) -> Option<&'t Token<'a>> {
        let tok = self.peek()?;
        self.pos += 1;
        Some(tok)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Whether the next token is the unquoted word `word`.
    pub(crate) fn peek_is(&self, word: &str) -> bool {
        self.peek().is_some_and(|t| t.is(word))
    }

    pub(crate) fn peek_kind(&self, kind: TokenKind) -> bool {
        self.peek().is_some_and(|t| t.kind == kind)
    }

    /// Consume `word` if it is next.
    pub(crate) fn eat(&mut self, word: &str) -> bool {
        if self.peek_is(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume a whole word sequence, or nothing.
    pub(crate) fn eat_seq(&mut self, words: &[&str]) -> bool {
        let matches = words
            .iter()
            .enumerate()
            .all(|(i, w)| self.peek_at(i).is_some_and(|t| t.is(w)));
        if matches {
            self.pos += words.len();
        }
        matches
    }

    /// Parse `name` or `schema.name`.
    pub(crate) fn qualified_name(&mut self) -> Option<QualifiedName> {
        let first = self.peek().filter(|t| t.is_word())?;
        self.pos += 1;
        if self.peek_kind(TokenKind::Dot) && self.peek_at(1).is_some_and(|t| t.is_word()) {
            let second = self.peek_at(1)?;
            self.pos += 2;
            Some(QualifiedName {
                schema: Some(fold_ident(first)),
                name: fold_ident(second),
                quoted: second.kind == TokenKind::QuotedIdent,
                raw: second.ident_value(),
            })
        } else {
            Some(QualifiedName {
                schema: None,
                name: fold_ident(first),
                quoted: first.kind == TokenKind::QuotedIdent,
                raw: first.ident_value(),
            })
        }
    }

    /// Consume a balanced parenthesized group, returning its inner tokens.
    pub(crate) fn paren_group(&mut self) -> Option<&'t [&'t Token<'a>]> {
        if !self.peek_kind(TokenKind::LeftParen) {
            return None;
        }
        let open = self.pos;
        let mut depth = 0usize;
        while let Some(tok) = self.next() {
            match tok.kind {
                TokenKind::LeftParen => depth += 1,
                TokenKind::RightParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&self.tokens[open + 1..self.pos - 1]);
                    }
                }
                _ => {}
            }
        }
        // Unbalanced: everything after the opener.
        Some(&self.tokens[open + 1..])
    }

    /// Tokens not yet consumed.
    pub(crate) fn rest(&self) -> &'t [&'t Token<'a>] {
        &self.tokens[self.pos.min(self.tokens.len())..]
    }
}

/// Fold an identifier token the way Postgres does.
pub(crate) fn fold_ident(tok: &Token<'_>) -> String {
    if tok.kind == TokenKind::QuotedIdent {
        tok.ident_value()
    } else {
        tok.text.to_lowercase()
    }
}

/// Split a token slice at top-level commas.
pub(crate) fn split_top_level<'t, 'a>(tokens: &'t [&'t Token<'a>]) -> Vec<&'t [&'t Token<'a>]> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, tok) in tokens.iter().enumerate() {
        match tok.kind {
            TokenKind::LeftParen | TokenKind::LeftBracket => depth += 1,
            TokenKind::RightParen | TokenKind::RightBracket => depth -= 1,
            TokenKind::Comma if depth == 0 => {
                parts.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < tokens.len() {
        parts.push(&tokens[start..]);
    }
    parts.retain(|p| !p.is_empty());
    parts
}

/// Reconstruct readable text from tokens, separating words with single spaces.
pub(crate) fn join_tokens(tokens: &[&Token<'_>]) -> String {
    let mut out = String::new();
    let mut prev: Option<TokenKind> = None;
    for tok in tokens {
        let glue = matches!(
            tok.kind,
            TokenKind::RightParen
                | TokenKind::Comma
                | TokenKind::Dot
                | TokenKind::LeftBracket
                | TokenKind::RightBracket
        ) || matches!(prev, Some(TokenKind::LeftParen | TokenKind::Dot | TokenKind::LeftBracket))
            || (tok.kind == TokenKind::LeftParen
                && matches!(prev, Some(TokenKind::Identifier | TokenKind::QuotedIdent)))
            || (tok.kind == TokenKind::Operator && tok.text == "::")
            || (prev == Some(TokenKind::Operator) && out.ends_with("::"));
        if !out.is_empty() && !glue {
            out.push(' ');
        }
        out.push_str(tok.text);
        prev = Some(tok.kind);
    }
    out
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Statement verbs that are recognized and ignored.
const SKIPPED_VERBS: &[&str] = &[
    "ANALYZE", "BEGIN", "CALL", "CHECKPOINT", "CLUSTER", "COMMENT", "COMMIT", "COPY", "DEALLOCATE",
    "DECLARE", "DELETE", "DISCARD", "DO", "DROP", "END", "EXECUTE", "EXPLAIN", "GRANT", "IMPORT",
    "INSERT", "LISTEN", "LOAD", "LOCK", "MERGE", "NOTIFY", "PREPARE", "REASSIGN", "REFRESH",
    "REINDEX", "RELEASE", "RESET", "REVOKE", "ROLLBACK", "SAVEPOINT", "SECURITY", "SELECT", "SET",
    "SHOW", "START", "TRUNCATE", "UNLISTEN", "UPDATE", "VACUUM", "VALUES", "WITH",
];

/// Object kinds after `CREATE` that are recognized and ignored.
const SKIPPED_CREATE_OBJECTS: &[&str] = &[
    "ACCESS", "AGGREGATE", "CAST", "COLLATION", "CONSTRAINT", "CONVERSION", "DATABASE", "DOMAIN",
    "EVENT", "EXTENSION", "FOREIGN", "FUNCTION", "GROUP", "LANGUAGE", "MATERIALIZED", "OPERATOR",
    "PROCEDURE", "PUBLICATION", "RECURSIVE", "ROLE", "RULE", "SCHEMA", "SEQUENCE", "SERVER",
    "STATISTICS", "SUBSCRIPTION", "TABLESPACE", "TEXT", "TRANSFORM", "TRIGGER", "USER", "VIEW",
];

enum Classified {
    Keep(StatementKind, QualifiedName),
    Skip,
    Unknown(String),
}

fn classify(tokens: &[&Token<'_>]) -> Classified {
    let mut cur = Cursor::new(tokens);
    let Some(first) = cur.next() else {
        return Classified::Skip;
    };

    if first.is("CREATE") {
        cur.eat_seq(&["OR", "REPLACE"]);
        // CREATE [GLOBAL | LOCAL] [TEMP | TEMPORARY | UNLOGGED] TABLE
        let _ = cur.eat("GLOBAL") || cur.eat("LOCAL");
        let _ = cur.eat("TEMP") || cur.eat("TEMPORARY") || cur.eat("UNLOGGED");
        if cur.eat("TABLE") {
            cur.eat_seq(&["IF", "NOT", "EXISTS"]);
            return match cur.qualified_name() {
                Some(name) => Classified::Keep(StatementKind::CreateTable, name),
                None => Classified::Unknown("CREATE TABLE without a table name".to_owned()),
            };
        }
        if cur.eat("UNIQUE") || cur.peek_is("INDEX") {
            if !cur.eat("INDEX") {
                return Classified::Unknown("CREATE UNIQUE without INDEX".to_owned());
            }
            // Skip to ON [ONLY] <table>.
            while let Some(tok) = cur.next() {
                if tok.is("ON") {
                    cur.eat("ONLY");
                    return match cur.qualified_name() {
                        Some(name) => Classified::Keep(StatementKind::CreateIndex, name),
                        None => Classified::Unknown("CREATE INDEX without a table".to_owned()),
                    };
                }
            }
            return Classified::Unknown("CREATE INDEX without ON clause".to_owned());
        }
        if cur.eat("POLICY") {
            if cur.qualified_name().is_none() || !cur.eat("ON") {
                return Classified::Unknown("CREATE POLICY without name or ON clause".to_owned());
            }
            return match cur.qualified_name() {
                Some(name) => Classified::Keep(StatementKind::CreatePolicy, name),
                None => Classified::Unknown("CREATE POLICY without a table".to_owned()),
            };
        }
        if cur.eat("TYPE") {
            return match cur.qualified_name() {
                Some(name) if cur.peek_is("AS") => Classified::Keep(StatementKind::CreateType, name),
                // Shell types and range/base types carry nothing to check.
                Some(_) => Classified::Skip,
                None => Classified::Unknown("CREATE TYPE without a type name".to_owned()),
            };
        }
        return match cur.peek() {
            Some(tok)
                if SKIPPED_CREATE_OBJECTS
                    .iter()
                    .any(|obj| tok.text.eq_ignore_ascii_case(obj)) =>
            {
                Classified::Skip
            }
            Some(tok) => Classified::Unknown(format!("unrecognized CREATE {} statement", tok.text)),
            None => Classified::Unknown("incomplete CREATE statement".to_owned()),
        };
    }

    if first.is("ALTER") {
        if cur.eat("TABLE") {
            cur.eat_seq(&["IF", "EXISTS"]);
            cur.eat("ONLY");
            return match cur.qualified_name() {
                Some(name) => Classified::Keep(StatementKind::AlterTable, name),
                None => Classified::Unknown("ALTER TABLE without a table name".to_owned()),
            };
        }
        // ALTER FUNCTION, ALTER POLICY, ALTER DEFAULT PRIVILEGES, ...
        return Classified::Skip;
    }

    if first.is_word()
        && SKIPPED_VERBS
            .iter()
            .any(|verb| first.text.eq_ignore_ascii_case(verb))
    {
        return Classified::Skip;
    }

    Classified::Unknown(format!("unrecognized statement starting with '{}'", first.text))
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// Scan a SQL source into classified statements.
///
/// `file_path` is recorded on every statement and warning; it is not read.
#[must_use]
pub fn scan(file_path: &str, source: &str) -> ScanOutput {
    let tokens = sql_lexer::tokenize(source);
    let meaningful = sql_lexer::meaningful_tokens(&tokens);
    let mut output = ScanOutput::default();

    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, tok) in meaningful.iter().enumerate() {
        match tok.kind {
            TokenKind::LeftParen => depth += 1,
            TokenKind::RightParen => depth = (depth - 1).max(0),
            TokenKind::Semicolon if depth == 0 => {
                emit(file_path, source, &meaningful[start..i], Some(*tok), &mut output);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < meaningful.len() {
        emit(file_path, source, &meaningful[start..], None, &mut output);
    }

    log::debug!(
        "scanned {}: {} kept, {} skipped, {} unclassified",
        file_path,
        output.statements.len(),
        output.skipped,
        output.warnings.len()
    );
    output
}

fn emit(
    file_path: &str,
    source: &str,
    stmt: &[&Token<'_>],
    terminator: Option<&Token<'_>>,
    output: &mut ScanOutput,
) {
    let Some(first) = stmt.first() else {
        return;
    };
    let end = match (terminator, stmt.last()) {
        (Some(semi), _) => semi.offset,
        (None, Some(last)) => last.offset + last.text.len(),
        (None, None) => source.len(),
    };
    let raw_text = source[first.offset..end].trim_end().to_owned();

    match classify(stmt) {
        Classified::Keep(kind, target) => output.statements.push(SchemaStatement {
            kind,
            target,
            raw_text,
            source_line: first.line,
            file_path: file_path.to_owned(),
        }),
        Classified::Skip => output.skipped += 1,
        Classified::Unknown(message) => output.warnings.push(ParseWarning {
            file_path: file_path.to_owned(),
            line: first.line,
            message,
            snippet: raw_text,
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
