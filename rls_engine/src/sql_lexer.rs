//! Lightweight Postgres SQL tokenizer.
//!
//! Produces a stream of [`Token`]s from SQL source text. Designed for the
//! statement scanner and rule checks, NOT for full AST construction.
//!
//! The lexer uses zero-copy `&str` slices into the source, tracks 1-based
//! line/column positions, and handles:
//!
//! - Keywords (case-insensitive) and unquoted identifiers
//! - Quoted identifiers `"Like This"` with `""` escapes
//! - String literals with `''` escapes
//! - Dollar-quoted bodies: `$$ ... $$` and `$tag$ ... $tag$`
//! - Positional parameters `$1`
//! - Number literals (integer, decimal, scientific notation)
//! - Operator runs: `=`, `<>`, `::`, `->>`, `@>`, `||`, ...
//! - Punctuation: `(`, `)`, `[`, `]`, `,`, `;`, `.`
//! - Line comments `-- ...` and nested block comments `/* /* */ */`
//!
//! Tokenization never fails: anything unrecognized becomes
//! [`TokenKind::Unknown`] and an unterminated literal runs to end of input.

/// A token kind produced by the SQL lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// SQL keyword: CREATE, TABLE, POLICY, REFERENCES, etc.
    Keyword,
    /// Unquoted identifier: table_name, column_name.
    Identifier,
    /// Double-quoted identifier.
    QuotedIdent,
    /// Single-quoted string literal.
    StringLiteral,
    /// Dollar-quoted string body, delimiters included.
    DollarString,
    /// Positional parameter `$1`.
    Parameter,
    /// Numeric literal.
    NumberLiteral,
    /// Operator run.
    Operator,
    /// Left parenthesis `(`.
    LeftParen,
    /// Right parenthesis `)`.
    RightParen,
    /// Left bracket `[`.
    LeftBracket,
    /// Right bracket `]`.
    RightBracket,
    /// Comma `,`.
    Comma,
    /// Semicolon `;`.
    Semicolon,
    /// Dot `.`.
    Dot,
    /// Line comment `-- ...`.
    LineComment,
    /// Block comment `/* ... */` (supports nesting).
    BlockComment,
    /// Spaces and tabs.
    Whitespace,
    /// `\n` or `\r\n`.
    Newline,
    /// Unrecognized character.
    Unknown,
}

/// A single token with its kind, text slice, and position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    /// The kind of token.
    pub kind: TokenKind,
    /// Zero-copy slice into the original source text.
    pub text: &'a str,
    /// Byte offset in the source.
    pub offset: usize,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

impl Token<'_> {
    /// Whether this token is a word (keyword, identifier or quoted identifier).
    #[must_use]
    pub fn is_word(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Keyword | TokenKind::Identifier | TokenKind::QuotedIdent
        )
    }

    /// Case-insensitive match against an unquoted word.
    #[must_use]
    pub fn is(&self, word: &str) -> bool {
        matches!(self.kind, TokenKind::Keyword | TokenKind::Identifier)
            && self.text.eq_ignore_ascii_case(word)
    }

    /// The identifier value: quotes stripped and `""` unescaped for quoted
    /// identifiers, text as written otherwise.
    #[must_use]
    pub fn ident_value(&self) -> String {
        if self.kind == TokenKind::QuotedIdent {
            let inner = self
                .text
                .strip_prefix('"')
                .map(|s| s.strip_suffix('"').unwrap_or(s))
                .unwrap_or(self.text);
            inner.replace("\"\"", "\"")
        } else {
            self.text.to_owned()
        }
    }
}

/// Keywords recognized by the lexer, uppercase and sorted for binary search.
const SQL_KEYWORDS: &[&str] = &[
    "ACTION",
    "ADD",
    "ALL",
    "ALTER",
    "ALWAYS",
    "AND",
    "AS",
    "ASC",
    "BEGIN",
    "BY",
    "CASCADE",
    "CHECK",
    "COLLATE",
    "COLUMN",
    "COMMENT",
    "COMMIT",
    "CONCURRENTLY",
    "CONSTRAINT",
    "CREATE",
    "DEFAULT",
    "DEFERRABLE",
    "DELETE",
    "DESC",
    "DISABLE",
    "DO",
    "DROP",
    "ENABLE",
    "ENUM",
    "EXCLUDE",
    "EXISTS",
    "EXTENSION",
    "FALSE",
    "FOR",
    "FORCE",
    "FOREIGN",
    "FROM",
    "FUNCTION",
    "GENERATED",
    "GRANT",
    "IDENTITY",
    "IF",
    "IN",
    "INCLUDE",
    "INDEX",
    "INSERT",
    "INTO",
    "IS",
    "KEY",
    "LEVEL",
    "LIKE",
    "MATERIALIZED",
    "NO",
    "NOT",
    "NULL",
    "ON",
    "ONLY",
    "OR",
    "PERMISSIVE",
    "POLICY",
    "PRIMARY",
    "REFERENCES",
    "RESTRICT",
    "RESTRICTIVE",
    "RETURNS",
    "REVOKE",
    "ROLE",
    "ROLLBACK",
    "ROW",
    "SCHEMA",
    "SECURITY",
    "SELECT",
    "SEQUENCE",
    "SET",
    "TABLE",
    "TEMP",
    "TEMPORARY",
    "TO",
    "TRIGGER",
    "TRUE",
    "TYPE",
    "UNIQUE",
    "UNLOGGED",
    "UPDATE",
    "USING",
    "VALUES",
    "VIEW",
    "WHERE",
    "WITH",
];

/// Characters that may form an operator run.
const OPERATOR_CHARS: &[u8] = b"+-*/%<>=!~@#&|^?:";

/// Check whether a word is a keyword (case-insensitive).
fn is_keyword(word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    SQL_KEYWORDS.binary_search(&upper.as_str()).is_ok()
}

/// Advance `line`/`col` over a consumed slice that may contain newlines.
fn advance_position(consumed: &str, line: &mut u32, col: &mut u32) {
    for c in consumed.chars() {
        if c == '\n' {
            *line += 1;
            *col = 1;
        } else if c != '\r' {
            *col += 1;
        }
    }
}

/// If a dollar-quote opening tag (`$$` or `$tag$`) starts at `pos`, return
/// the tag including both dollar signs.
fn dollar_tag(source: &str, pos: usize) -> Option<&str> {
    let bytes = source.as_bytes();
    let mut end = pos + 1;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'$' {
        // Tags cannot start with a digit; `$1$` is not a tag.
        let tag_body = &source[pos + 1..end];
        if tag_body.bytes().next().is_some_and(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(&source[pos..=end])
    } else {
        None
    }
}

/// Tokenize a SQL source string into a vector of [`Token`]s.
#[must_use]
pub fn tokenize(source: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut pos: usize = 0;
    let mut line: u32 = 1;
    let mut col: u32 = 1;

    macro_rules! push {
        ($kind:expr, $start:expr, $line:expr, $col:expr) => {
            tokens.push(Token {
                kind: $kind,
                text: &source[$start..pos],
                offset: $start,
                line: $line,
                column: $col,
            })
        };
    }

    while pos < len {
        let start = pos;
        let start_line = line;
        let start_col = col;
        let ch = bytes[pos];

        // Newline: \r\n, \n or bare \r
        if ch == b'\n' || ch == b'\r' {
            pos += if ch == b'\r' && pos + 1 < len && bytes[pos + 1] == b'\n' {
                2
            } else {
                1
            };
            push!(TokenKind::Newline, start, start_line, start_col);
            line += 1;
            col = 1;
            continue;
        }

        // Whitespace
        if ch == b' ' || ch == b'\t' {
            while pos < len && (bytes[pos] == b' ' || bytes[pos] == b'\t') {
                pos += 1;
                col += 1;
            }
            push!(TokenKind::Whitespace, start, start_line, start_col);
            continue;
        }

        // Line comment
        if ch == b'-' && pos + 1 < len && bytes[pos + 1] == b'-' {
            while pos < len && bytes[pos] != b'\n' && bytes[pos] != b'\r' {
                pos += 1;
            }
            advance_position(&source[start..pos], &mut line, &mut col);
            push!(TokenKind::LineComment, start, start_line, start_col);
            continue;
        }

        // Block comment with nesting
        if ch == b'/' && pos + 1 < len && bytes[pos + 1] == b'*' {
            pos += 2;
            let mut depth: u32 = 1;
            while pos < len && depth > 0 {
                if bytes[pos] == b'/' && pos + 1 < len && bytes[pos + 1] == b'*' {
                    depth += 1;
                    pos += 2;
                } else if bytes[pos] == b'*' && pos + 1 < len && bytes[pos + 1] == b'/' {
                    depth -= 1;
                    pos += 2;
                } else {
                    pos += 1;
                }
            }
            // Keep `pos` on a char boundary after multi-byte content.
            while pos < len && !source.is_char_boundary(pos) {
                pos += 1;
            }
            advance_position(&source[start..pos], &mut line, &mut col);
            push!(TokenKind::BlockComment, start, start_line, start_col);
            continue;
        }

        // String literal with '' escape
        if ch == b'\'' {
            pos += 1;
            while pos < len {
                if bytes[pos] == b'\'' {
                    pos += 1;
                    if pos < len && bytes[pos] == b'\'' {
                        pos += 1;
                        continue;
                    }
                    break;
                }
                pos += 1;
            }
            while pos < len && !source.is_char_boundary(pos) {
                pos += 1;
            }
            advance_position(&source[start..pos], &mut line, &mut col);
            push!(TokenKind::StringLiteral, start, start_line, start_col);
            continue;
        }

        // Quoted identifier with "" escape
        if ch == b'"' {
            pos += 1;
            while pos < len {
                if bytes[pos] == b'"' {
                    pos += 1;
                    if pos < len && bytes[pos] == b'"' {
                        pos += 1;
                        continue;
                    }
                    break;
                }
                pos += 1;
            }
            while pos < len && !source.is_char_boundary(pos) {
                pos += 1;
            }
            advance_position(&source[start..pos], &mut line, &mut col);
            push!(TokenKind::QuotedIdent, start, start_line, start_col);
            continue;
        }

        // Dollar quoting or positional parameter
        if ch == b'$' {
            if let Some(tag) = dollar_tag(source, pos) {
                let body_start = pos + tag.len();
                pos = match source[body_start..].find(tag) {
                    Some(rel) => body_start + rel + tag.len(),
                    None => len,
                };
                advance_position(&source[start..pos], &mut line, &mut col);
                push!(TokenKind::DollarString, start, start_line, start_col);
                continue;
            }
            if pos + 1 < len && bytes[pos + 1].is_ascii_digit() {
                pos += 1;
                while pos < len && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
                col += (pos - start) as u32;
                push!(TokenKind::Parameter, start, start_line, start_col);
                continue;
            }
        }

        // Number literals
        if ch.is_ascii_digit() {
            while pos < len && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            if pos < len && bytes[pos] == b'.' && pos + 1 < len && bytes[pos + 1].is_ascii_digit() {
                pos += 1;
                while pos < len && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
            }
            if pos < len && (bytes[pos] == b'e' || bytes[pos] == b'E') {
                let mut probe = pos + 1;
                if probe < len && (bytes[probe] == b'+' || bytes[probe] == b'-') {
                    probe += 1;
                }
                if probe < len && bytes[probe].is_ascii_digit() {
                    pos = probe;
                    while pos < len && bytes[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
            }
            col += (pos - start) as u32;
            push!(TokenKind::NumberLiteral, start, start_line, start_col);
            continue;
        }

        // Identifiers and keywords; `$` is allowed after the first character.
        if ch.is_ascii_alphabetic() || ch == b'_' || ch > 127 {
            let mut first = true;
            while pos < len {
                let byte = bytes[pos];
                if byte.is_ascii_alphanumeric() || byte == b'_' || (!first && byte == b'$') {
                    pos += 1;
                } else if byte > 127 {
                    match source[pos..].chars().next() {
                        Some(c) if c.is_alphanumeric() || c == '_' => pos += c.len_utf8(),
                        _ => break,
                    }
                } else {
                    break;
                }
                first = false;
            }
            if pos == start {
                // A non-alphanumeric multi-byte character: fall through as Unknown.
                let c_len = source[pos..].chars().next().map_or(1, char::len_utf8);
                pos += c_len;
                col += 1;
                push!(TokenKind::Unknown, start, start_line, start_col);
                continue;
            }
            col += source[start..pos].chars().count() as u32;
            let kind = if is_keyword(&source[start..pos]) {
                TokenKind::Keyword
            } else {
                TokenKind::Identifier
            };
            push!(kind, start, start_line, start_col);
            continue;
        }

        // Punctuation
        let punct = match ch {
            b'(' => Some(TokenKind::LeftParen),
            b')' => Some(TokenKind::RightParen),
            b'[' => Some(TokenKind::LeftBracket),
            b']' => Some(TokenKind::RightBracket),
            b',' => Some(TokenKind::Comma),
            b';' => Some(TokenKind::Semicolon),
            b'.' => Some(TokenKind::Dot),
            _ => None,
        };
        if let Some(kind) = punct {
            pos += 1;
            col += 1;
            push!(kind, start, start_line, start_col);
            continue;
        }

        // Operator runs; stop before a comment opener.
        if OPERATOR_CHARS.contains(&ch) {
            pos += 1;
            while pos < len && OPERATOR_CHARS.contains(&bytes[pos]) {
                let starts_comment = (bytes[pos] == b'-' && pos + 1 < len && bytes[pos + 1] == b'-')
                    || (bytes[pos] == b'/' && pos + 1 < len && bytes[pos + 1] == b'*');
                if starts_comment {
                    break;
                }
                pos += 1;
            }
            col += (pos - start) as u32;
            push!(TokenKind::Operator, start, start_line, start_col);
            continue;
        }

        // Unknown character (UTF-8 aware)
        pos += source[pos..].chars().next().map_or(1, char::len_utf8);
        col += 1;
        push!(TokenKind::Unknown, start, start_line, start_col);
    }

    tokens
}

/// Filter a token stream to the tokens that carry meaning: everything except
/// whitespace, newlines and comments.
#[must_use]
pub fn meaningful_tokens<'a>(tokens: &'a [Token<'a>]) -> Vec<&'a Token<'a>> {
    tokens
        .iter()
        .filter(|t| {
            !matches!(
                t.kind,
                TokenKind::Whitespace
                    | TokenKind::Newline
                    | TokenKind::LineComment
                    | TokenKind::BlockComment
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
