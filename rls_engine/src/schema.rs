//! Static schema model folded from scanned statements.
//!
//! [`fold`] turns the [`SchemaStatement`]s of one analysis unit (a file, or
//! every file under `--merge`) into [`Table`]s: columns, constraints,
//! indexes, policies and RLS flags. CREATE TABLE statements are folded first
//! so that indexes, policies and ALTERs may appear before or after their
//! table in the same unit. Statements naming a table that is not defined in
//! the unit are ignored.
//!
//! All collections are `Vec`s in source order, so folding is deterministic.

use crate::scanner::{
    fold_ident, join_tokens, split_top_level, Cursor, QualifiedName, SchemaStatement,
    StatementKind,
};
use crate::sql_lexer::{self, Token, TokenKind};
use crate::types::Operation;

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// A table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Folded name used for matching.
    pub name: String,
    /// Name as written, quotes stripped.
    pub raw_name: String,
    /// Lowercased type text, e.g. `"numeric(10, 2)"` or `"text[]"`.
    pub data_type: String,
    pub nullable: bool,
    /// DEFAULT, identity, generated or serial.
    pub has_default: bool,
    pub is_array: bool,
    pub is_jsonb: bool,
    pub is_tsvector: bool,
    pub line: u32,
    /// File of the statement that defined the column.
    pub file_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    ForeignKey,
    Unique,
    Check,
}

/// Target of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    pub table: QualifiedName,
    pub columns: Vec<String>,
    /// Uppercase action, e.g. `"CASCADE"` or `"SET NULL"`.
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
}

/// A table or column constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub kind: ConstraintKind,
    /// Explicit name as written, if any.
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub references: Option<ForeignKeyRef>,
    /// CHECK expression text.
    pub expression: Option<String>,
    pub line: u32,
    pub file_path: String,
}

/// An index. Expression elements are kept as their text and never match a
/// column name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub unique: bool,
    pub partial: bool,
    /// Access method, lowercased; `btree` when not given.
    pub method: String,
    pub line: u32,
    pub file_path: String,
}

/// Command a policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyCommand {
    All,
    Select,
    Insert,
    Update,
    Delete,
}

impl PolicyCommand {
    /// Whether a policy for this command governs `op`.
    #[must_use]
    pub fn covers(self, op: Operation) -> bool {
        matches!(
            (self, op),
            (Self::All, _)
                | (Self::Select, Operation::Select)
                | (Self::Insert, Operation::Insert)
                | (Self::Update, Operation::Update)
                | (Self::Delete, Operation::Delete)
        )
    }

    /// Whether the command can write rows (and so needs WITH CHECK).
    #[must_use]
    pub fn writes(self) -> bool {
        matches!(self, Self::All | Self::Insert | Self::Update)
    }
}

impl std::fmt::Display for PolicyCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "ALL"),
            Self::Select => write!(f, "SELECT"),
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// A row-level security policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Policy name as written.
    pub name: String,
    pub command: PolicyCommand,
    /// `false` for `AS RESTRICTIVE`.
    pub permissive: bool,
    /// Folded role names; empty means PUBLIC.
    pub roles: Vec<String>,
    pub using: Option<String>,
    pub with_check: Option<String>,
    /// Columns of the owning table read by either predicate, in first-seen order.
    pub referenced_columns: Vec<String>,
    pub line: u32,
    pub file_path: String,
}

/// Static view of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: QualifiedName,
    pub columns: Vec<Column>,
    pub constraints: Vec<Constraint>,
    pub indexes: Vec<Index>,
    pub rls_enabled: bool,
    pub rls_forced: bool,
    pub policies: Vec<Policy>,
    pub file_path: String,
    pub line: u32,
}

impl Table {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn has_primary_key(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| c.kind == ConstraintKind::PrimaryKey)
    }

    /// Whether `column` is the leading column of an index, primary key or
    /// unique constraint.
    #[must_use]
    pub fn is_leading_indexed(&self, column: &str) -> bool {
        let by_index = self
            .indexes
            .iter()
            .any(|i| i.columns.first().is_some_and(|c| c == column));
        let by_constraint = self.constraints.iter().any(|c| {
            matches!(c.kind, ConstraintKind::PrimaryKey | ConstraintKind::Unique)
                && c.columns.first().is_some_and(|col| col == column)
        });
        by_index || by_constraint
    }

    /// Permissive policies that govern `op`.
    pub fn permissive_policies_for(&self, op: Operation) -> impl Iterator<Item = &Policy> {
        self.policies
            .iter()
            .filter(move |p| p.permissive && p.command.covers(op))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Enum,
    Composite,
}

/// A named attribute of a composite type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAttribute {
    pub raw_name: String,
    pub line: u32,
}

/// A user-defined enum or composite type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    pub name: QualifiedName,
    pub kind: TypeKind,
    pub labels: Vec<String>,
    pub attributes: Vec<TypeAttribute>,
    pub line: u32,
    pub file_path: String,
}

// ---------------------------------------------------------------------------
// Fold
// ---------------------------------------------------------------------------

/// Fold statements into tables. `default_schema` resolves unqualified names.
#[must_use]
pub fn fold(statements: &[SchemaStatement], default_schema: &str) -> Vec<Table> {
    let mut tables: Vec<Table> = Vec::new();

    for stmt in statements
        .iter()
        .filter(|s| s.kind == StatementKind::CreateTable)
    {
        let Some(table) = parse_create_table(stmt) else {
            continue;
        };
        if tables
            .iter()
            .any(|t| t.name.same_object(&table.name, default_schema))
        {
            log::debug!(
                "{}:{}: duplicate CREATE TABLE {}, keeping the first",
                stmt.file_path,
                stmt.source_line,
                table.name
            );
            continue;
        }
        tables.push(table);
    }

    for stmt in statements
        .iter()
        .filter(|s| !matches!(s.kind, StatementKind::CreateTable | StatementKind::CreateType))
    {
        let Some(table) = tables
            .iter_mut()
            .find(|t| t.name.same_object(&stmt.target, default_schema))
        else {
            log::debug!(
                "{}:{}: {:?} targets {} which is not defined here",
                stmt.file_path,
                stmt.source_line,
                stmt.kind,
                stmt.target
            );
            continue;
        };
        match stmt.kind {
            StatementKind::CreateIndex => {
                if let Some(index) = parse_index(stmt) {
                    table.indexes.push(index);
                }
            }
            StatementKind::CreatePolicy => {
                if let Some(policy) = parse_policy(stmt) {
                    table.policies.push(policy);
                }
            }
            StatementKind::AlterTable => apply_alter(table, stmt),
            StatementKind::CreateTable | StatementKind::CreateType => {}
        }
    }

    for table in &mut tables {
        let columns: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
        let table_name = table.name.name.clone();
        for policy in &mut table.policies {
            let mut referenced = Vec::new();
            for expr in [&policy.using, &policy.with_check].into_iter().flatten() {
                for col in predicate_columns(expr, &table_name, &columns) {
                    if !referenced.contains(&col) {
                        referenced.push(col);
                    }
                }
            }
            policy.referenced_columns = referenced;
        }
    }

    tables
}

/// Line of `tok` in the original file.
fn line_of(stmt: &SchemaStatement, tok: &Token<'_>) -> u32 {
    stmt.source_line + tok.line.saturating_sub(1)
}

/// Words that end a column's type and begin its constraints.
const COLUMN_CONSTRAINT_STARTERS: &[&str] = &[
    "CHECK",
    "COLLATE",
    "CONSTRAINT",
    "DEFAULT",
    "DEFERRABLE",
    "GENERATED",
    "INITIALLY",
    "NOT",
    "NULL",
    "PRIMARY",
    "REFERENCES",
    "UNIQUE",
];

fn is_constraint_starter(tok: &Token<'_>) -> bool {
    COLUMN_CONSTRAINT_STARTERS.iter().any(|w| tok.is(w))
}

fn parse_create_table(stmt: &SchemaStatement) -> Option<Table> {
    let tokens = sql_lexer::tokenize(&stmt.raw_text);
    let meaningful = sql_lexer::meaningful_tokens(&tokens);
    let mut cur = Cursor::new(&meaningful);

    // Header already validated by the scanner; skip to the name.
    while let Some(tok) = cur.next() {
        if tok.is("TABLE") {
            break;
        }
    }
    cur.eat_seq(&["IF", "NOT", "EXISTS"]);
    let name = cur.qualified_name()?;

    let mut table = Table {
        name,
        columns: Vec::new(),
        constraints: Vec::new(),
        indexes: Vec::new(),
        rls_enabled: false,
        rls_forced: false,
        policies: Vec::new(),
        file_path: stmt.file_path.clone(),
        line: stmt.source_line,
    };

    // CREATE TABLE ... AS / PARTITION OF carry no column list to check.
    let Some(body) = cur.paren_group() else {
        return Some(table);
    };

    for element in split_top_level(body) {
        add_table_element(&mut table, stmt, element);
    }
    Some(table)
}

/// Fold one element of a CREATE TABLE body or an ALTER TABLE ADD.
fn add_table_element(table: &mut Table, stmt: &SchemaStatement, element: &[&Token<'_>]) {
    let mut cur = Cursor::new(element);
    let Some(first) = cur.peek() else {
        return;
    };
    let line = line_of(stmt, first);

    let is_constraint = ["CONSTRAINT", "PRIMARY", "FOREIGN", "UNIQUE", "CHECK", "EXCLUDE"]
        .iter()
        .any(|w| first.is(w));
    if is_constraint {
        let name = if cur.eat("CONSTRAINT") {
            cur.next().map(Token::ident_value)
        } else {
            None
        };
        if let Some(mut c) = parse_table_constraint(&mut cur, name, line) {
            c.file_path.clone_from(&stmt.file_path);
            table.constraints.push(c);
        }
        return;
    }
    if first.is("LIKE") {
        return;
    }

    if let Some((column, constraints)) = parse_column(&mut cur, stmt) {
        if table.column(&column.name).is_none() {
            table.columns.push(column);
        }
        table.constraints.extend(constraints);
    }
}

/// Column names from a parenthesized list.
fn ident_list(tokens: &[&Token<'_>]) -> Vec<String> {
    split_top_level(tokens)
        .into_iter()
        .filter_map(|part| part.first().filter(|t| t.is_word()).map(|t| fold_ident(t)))
        .collect()
}

fn parse_table_constraint(
    cur: &mut Cursor<'_, '_>,
    name: Option<String>,
    line: u32,
) -> Option<Constraint> {
    let mut constraint = Constraint {
        kind: ConstraintKind::Check,
        name,
        columns: Vec::new(),
        references: None,
        expression: None,
        line,
        file_path: String::new(),
    };
    if cur.eat_seq(&["PRIMARY", "KEY"]) {
        constraint.kind = ConstraintKind::PrimaryKey;
        constraint.columns = cur.paren_group().map(ident_list).unwrap_or_default();
    } else if cur.eat("UNIQUE") {
        constraint.kind = ConstraintKind::Unique;
        cur.eat_seq(&["NULLS", "NOT", "DISTINCT"]);
        cur.eat_seq(&["NULLS", "DISTINCT"]);
        constraint.columns = cur.paren_group().map(ident_list).unwrap_or_default();
    } else if cur.eat_seq(&["FOREIGN", "KEY"]) {
        constraint.kind = ConstraintKind::ForeignKey;
        constraint.columns = cur.paren_group().map(ident_list).unwrap_or_default();
        if !cur.eat("REFERENCES") {
            return None;
        }
        constraint.references = Some(parse_references(cur)?);
    } else if cur.eat("CHECK") {
        constraint.expression = cur.paren_group().map(join_tokens);
    } else {
        // EXCLUDE and anything unrecognized.
        return None;
    }
    Some(constraint)
}

/// Parse the part after `REFERENCES`.
fn parse_references(cur: &mut Cursor<'_, '_>) -> Option<ForeignKeyRef> {
    let table = cur.qualified_name()?;
    let columns = if cur.peek_kind(TokenKind::LeftParen) {
        cur.paren_group().map(ident_list).unwrap_or_default()
    } else {
        Vec::new()
    };
    let mut fk = ForeignKeyRef {
        table,
        columns,
        on_delete: None,
        on_update: None,
    };
    loop {
        if cur.eat("MATCH") {
            cur.next();
            continue;
        }
        if cur.eat_seq(&["ON", "DELETE"]) {
            fk.on_delete = parse_action(cur);
            continue;
        }
        if cur.eat_seq(&["ON", "UPDATE"]) {
            fk.on_update = parse_action(cur);
            continue;
        }
        break;
    }
    Some(fk)
}

fn parse_action(cur: &mut Cursor<'_, '_>) -> Option<String> {
    let action = if cur.eat("CASCADE") {
        "CASCADE"
    } else if cur.eat("RESTRICT") {
        "RESTRICT"
    } else if cur.eat_seq(&["NO", "ACTION"]) {
        "NO ACTION"
    } else if cur.eat_seq(&["SET", "NULL"]) {
        "SET NULL"
    } else if cur.eat_seq(&["SET", "DEFAULT"]) {
        "SET DEFAULT"
    } else {
        return None;
    };
    // SET NULL (col, ...) column lists.
    if cur.peek_kind(TokenKind::LeftParen) {
        cur.paren_group();
    }
    Some(action.to_owned())
}

const SERIAL_TYPES: &[&str] = &[
    "bigserial",
    "serial",
    "serial2",
    "serial4",
    "serial8",
    "smallserial",
];

fn parse_column(
    cur: &mut Cursor<'_, '_>,
    stmt: &SchemaStatement,
) -> Option<(Column, Vec<Constraint>)> {
    let name_tok = cur.next().filter(|t| t.is_word())?;
    let line = line_of(stmt, name_tok);
    let name = fold_ident(name_tok);

    let mut type_tokens = Vec::new();
    let mut depth = 0i32;
    while let Some(tok) = cur.peek() {
        if depth == 0 && is_constraint_starter(tok) {
            break;
        }
        match tok.kind {
            TokenKind::LeftParen => depth += 1,
            TokenKind::RightParen => depth -= 1,
            _ => {}
        }
        type_tokens.push(tok);
        cur.next();
    }
    let data_type = join_tokens(&type_tokens).to_lowercase();
    let type_word = |w: &str| {
        type_tokens
            .iter()
            .any(|t| t.is_word() && t.text.eq_ignore_ascii_case(w))
    };
    let is_array = type_tokens
        .iter()
        .any(|t| t.kind == TokenKind::LeftBracket)
        || type_word("ARRAY");

    let mut column = Column {
        raw_name: name_tok.ident_value(),
        name: name.clone(),
        nullable: true,
        has_default: SERIAL_TYPES.iter().any(|s| type_word(s)),
        is_array,
        is_jsonb: type_word("jsonb"),
        is_tsvector: type_word("tsvector"),
        data_type,
        line,
        file_path: stmt.file_path.clone(),
    };

    let mut constraints = Vec::new();
    let mut pending_name: Option<String> = None;
    let single = || vec![name.clone()];

    while !cur.is_done() {
        if cur.eat("CONSTRAINT") {
            pending_name = cur.next().map(Token::ident_value);
            continue;
        }
        if cur.eat_seq(&["NOT", "NULL"]) {
            column.nullable = false;
            continue;
        }
        if cur.eat("NULL") {
            continue;
        }
        if cur.eat("DEFAULT") {
            column.has_default = true;
            skip_expression(cur);
            continue;
        }
        if cur.eat("GENERATED") {
            column.has_default = true;
            while let Some(tok) = cur.peek() {
                if tok.kind == TokenKind::LeftParen {
                    cur.paren_group();
                } else if ["ALWAYS", "BY", "DEFAULT", "AS", "IDENTITY", "STORED"]
                    .iter()
                    .any(|w| tok.is(w))
                {
                    cur.next();
                } else {
                    break;
                }
            }
            continue;
        }
        if cur.eat_seq(&["PRIMARY", "KEY"]) {
            column.nullable = false;
            constraints.push(Constraint {
                kind: ConstraintKind::PrimaryKey,
                name: pending_name.take(),
                columns: single(),
                references: None,
                expression: None,
                line,
                file_path: stmt.file_path.clone(),
            });
            continue;
        }
        if cur.eat("UNIQUE") {
            cur.eat_seq(&["NULLS", "NOT", "DISTINCT"]);
            constraints.push(Constraint {
                kind: ConstraintKind::Unique,
                name: pending_name.take(),
                columns: single(),
                references: None,
                expression: None,
                line,
                file_path: stmt.file_path.clone(),
            });
            continue;
        }
        if cur.eat("REFERENCES") {
            let references = parse_references(cur);
            constraints.push(Constraint {
                kind: ConstraintKind::ForeignKey,
                name: pending_name.take(),
                columns: single(),
                references,
                expression: None,
                line,
                file_path: stmt.file_path.clone(),
            });
            continue;
        }
        if cur.eat("CHECK") {
            let expression = cur.paren_group().map(join_tokens);
            cur.eat_seq(&["NO", "INHERIT"]);
            constraints.push(Constraint {
                kind: ConstraintKind::Check,
                name: pending_name.take(),
                columns: single(),
                references: None,
                expression,
                line,
                file_path: stmt.file_path.clone(),
            });
            continue;
        }
        if cur.eat("COLLATE") {
            cur.qualified_name();
            continue;
        }
        // DEFERRABLE, INITIALLY DEFERRED and the like.
        cur.next();
    }

    Some((column, constraints))
}

/// Skip a DEFAULT expression up to the next column constraint keyword.
fn skip_expression(cur: &mut Cursor<'_, '_>) {
    let mut first = true;
    while let Some(tok) = cur.peek() {
        if !first && is_constraint_starter(tok) {
            break;
        }
        if tok.kind == TokenKind::LeftParen {
            cur.paren_group();
        } else {
            cur.next();
        }
        first = false;
    }
}

fn parse_index(stmt: &SchemaStatement) -> Option<Index> {
    let tokens = sql_lexer::tokenize(&stmt.raw_text);
    let meaningful = sql_lexer::meaningful_tokens(&tokens);
    let mut cur = Cursor::new(&meaningful);

    cur.eat("CREATE");
    let unique = cur.eat("UNIQUE");
    if !cur.eat("INDEX") {
        return None;
    }
    cur.eat("CONCURRENTLY");
    cur.eat_seq(&["IF", "NOT", "EXISTS"]);
    let name = if cur.peek_is("ON") {
        None
    } else {
        cur.qualified_name().map(|n| n.raw)
    };
    if !cur.eat("ON") {
        return None;
    }
    cur.eat("ONLY");
    cur.qualified_name()?;

    let method = if cur.eat("USING") {
        cur.next()
            .map_or_else(|| "btree".to_owned(), |t| t.text.to_lowercase())
    } else {
        "btree".to_owned()
    };

    let elements = cur.paren_group().unwrap_or_default();
    let columns = split_top_level(elements)
        .into_iter()
        .map(|part| {
            let plain = part[0].is_word()
                && part
                    .get(1)
                    .map_or(true, |next| next.is_word());
            if plain {
                fold_ident(part[0])
            } else {
                join_tokens(part)
            }
        })
        .collect();

    let partial = cur.rest().iter().any(|t| t.is("WHERE"));

    Some(Index {
        name,
        columns,
        unique,
        partial,
        method,
        line: stmt.source_line,
        file_path: stmt.file_path.clone(),
    })
}

fn parse_policy(stmt: &SchemaStatement) -> Option<Policy> {
    let tokens = sql_lexer::tokenize(&stmt.raw_text);
    let meaningful = sql_lexer::meaningful_tokens(&tokens);
    let mut cur = Cursor::new(&meaningful);

    if !cur.eat_seq(&["CREATE", "POLICY"]) {
        return None;
    }
    let name = cur.next().filter(|t| t.is_word())?.ident_value();
    if !cur.eat("ON") {
        return None;
    }
    cur.qualified_name()?;

    let mut policy = Policy {
        name,
        command: PolicyCommand::All,
        permissive: true,
        roles: Vec::new(),
        using: None,
        with_check: None,
        referenced_columns: Vec::new(),
        line: stmt.source_line,
        file_path: stmt.file_path.clone(),
    };

    while !cur.is_done() {
        if cur.eat("AS") {
            policy.permissive = !cur.eat("RESTRICTIVE");
            cur.eat("PERMISSIVE");
        } else if cur.eat("FOR") {
            policy.command = match cur.next() {
                Some(t) if t.is("SELECT") => PolicyCommand::Select,
                Some(t) if t.is("INSERT") => PolicyCommand::Insert,
                Some(t) if t.is("UPDATE") => PolicyCommand::Update,
                Some(t) if t.is("DELETE") => PolicyCommand::Delete,
                _ => PolicyCommand::All,
            };
        } else if cur.eat("TO") {
            while let Some(tok) = cur.peek() {
                if tok.is("USING") || tok.is("WITH") {
                    break;
                }
                if tok.is_word() {
                    policy.roles.push(fold_ident(tok));
                }
                cur.next();
            }
        } else if cur.eat("USING") {
            policy.using = cur.paren_group().map(join_tokens);
        } else if cur.eat_seq(&["WITH", "CHECK"]) {
            policy.with_check = cur.paren_group().map(join_tokens);
        } else {
            cur.next();
        }
    }
    policy.roles.retain(|r| r != "public");
    Some(policy)
}

fn apply_alter(table: &mut Table, stmt: &SchemaStatement) {
    let tokens = sql_lexer::tokenize(&stmt.raw_text);
    let meaningful = sql_lexer::meaningful_tokens(&tokens);
    let mut cur = Cursor::new(&meaningful);

    cur.eat_seq(&["ALTER", "TABLE"]);
    cur.eat_seq(&["IF", "EXISTS"]);
    cur.eat("ONLY");
    if cur.qualified_name().is_none() {
        return;
    }

    for action in split_top_level(cur.rest()) {
        let mut act = Cursor::new(action);
        if act.eat_seq(&["ENABLE", "ROW", "LEVEL", "SECURITY"]) {
            table.rls_enabled = true;
        } else if act.eat_seq(&["DISABLE", "ROW", "LEVEL", "SECURITY"]) {
            table.rls_enabled = false;
        } else if act.eat_seq(&["FORCE", "ROW", "LEVEL", "SECURITY"]) {
            table.rls_forced = true;
        } else if act.eat_seq(&["NO", "FORCE", "ROW", "LEVEL", "SECURITY"]) {
            table.rls_forced = false;
        } else if act.eat("ADD") {
            let is_constraint = act.peek().is_some_and(|t| {
                ["CONSTRAINT", "PRIMARY", "FOREIGN", "UNIQUE", "CHECK", "EXCLUDE"]
                    .iter()
                    .any(|w| t.is(w))
            });
            if !is_constraint {
                act.eat("COLUMN");
                act.eat_seq(&["IF", "NOT", "EXISTS"]);
            }
            add_table_element(table, stmt, act.rest());
        } else if act.eat_seq(&["DROP", "CONSTRAINT"]) {
            act.eat_seq(&["IF", "EXISTS"]);
            if let Some(tok) = act.next() {
                let dropped = tok.ident_value();
                table
                    .constraints
                    .retain(|c| c.name.as_deref() != Some(dropped.as_str()));
            }
        } else if act.eat("DROP") {
            act.eat("COLUMN");
            act.eat_seq(&["IF", "EXISTS"]);
            if let Some(tok) = act.next().filter(|t| t.is_word()) {
                let dropped = fold_ident(tok);
                table.columns.retain(|c| c.name != dropped);
            }
        } else if act.eat("ALTER") {
            act.eat("COLUMN");
            let Some(col_name) = act.next().filter(|t| t.is_word()).map(|t| fold_ident(t))
            else {
                continue;
            };
            let Some(column) = table.columns.iter_mut().find(|c| c.name == col_name) else {
                continue;
            };
            if act.eat_seq(&["SET", "NOT", "NULL"]) {
                column.nullable = false;
            } else if act.eat_seq(&["DROP", "NOT", "NULL"]) {
                column.nullable = true;
            } else if act.eat_seq(&["SET", "DEFAULT"]) || act.eat("ADD") {
                column.has_default = true;
            } else if act.eat_seq(&["DROP", "DEFAULT"]) {
                column.has_default = false;
            }
        }
    }
}

/// Parse a CREATE TYPE statement into a [`TypeDef`].
#[must_use]
pub fn parse_type(stmt: &SchemaStatement) -> Option<TypeDef> {
    if stmt.kind != StatementKind::CreateType {
        return None;
    }
    let tokens = sql_lexer::tokenize(&stmt.raw_text);
    let meaningful = sql_lexer::meaningful_tokens(&tokens);
    let mut cur = Cursor::new(&meaningful);

    cur.eat_seq(&["CREATE", "TYPE"]);
    let name = cur.qualified_name()?;
    if !cur.eat("AS") {
        return None;
    }
    let (kind, body) = if cur.eat("ENUM") {
        (TypeKind::Enum, cur.paren_group().unwrap_or_default())
    } else {
        (TypeKind::Composite, cur.paren_group()?)
    };

    let mut def = TypeDef {
        name,
        kind,
        labels: Vec::new(),
        attributes: Vec::new(),
        line: stmt.source_line,
        file_path: stmt.file_path.clone(),
    };
    for part in split_top_level(body) {
        let first = part[0];
        match kind {
            TypeKind::Enum if first.kind == TokenKind::StringLiteral => {
                let inner = first.text.strip_prefix('\'').unwrap_or(first.text);
                let inner = inner.strip_suffix('\'').unwrap_or(inner);
                let label = inner.replace("''", "'");
                def.labels.push(label);
            }
            TypeKind::Composite if first.is_word() => def.attributes.push(TypeAttribute {
                raw_name: first.ident_value(),
                line: line_of(stmt, first),
            }),
            _ => {}
        }
    }
    Some(def)
}

// ---------------------------------------------------------------------------
// Predicate column extraction
// ---------------------------------------------------------------------------

/// Columns of `table_name` read by a policy predicate.
///
/// A bare identifier counts when it names a column and is not a function
/// call. Qualified references count only when qualified by the table name.
/// Inside sub-SELECTs only table-qualified references count.
#[must_use]
pub fn predicate_columns(expr: &str, table_name: &str, columns: &[String]) -> Vec<String> {
    let tokens = sql_lexer::tokenize(expr);
    let toks = sql_lexer::meaningful_tokens(&tokens);
    let mut found: Vec<String> = Vec::new();
    let mut depth = 0i32;
    let mut subquery_depths: Vec<i32> = Vec::new();
    let mut i = 0;

    while i < toks.len() {
        let tok = toks[i];
        let next = toks.get(i + 1).copied();
        match tok.kind {
            TokenKind::LeftParen => {
                depth += 1;
                if next.is_some_and(|n| n.is("SELECT")) {
                    subquery_depths.push(depth);
                }
            }
            TokenKind::RightParen => {
                if subquery_depths.last() == Some(&depth) {
                    subquery_depths.pop();
                }
                depth -= 1;
            }
            _ if tok.is_word() => {
                let after_dot = i > 0 && toks[i - 1].kind == TokenKind::Dot;
                if next.is_some_and(|n| n.kind == TokenKind::Dot) {
                    // qualifier.column
                    if let Some(col_tok) = toks.get(i + 2).filter(|t| t.is_word()) {
                        let is_call = toks
                            .get(i + 3)
                            .is_some_and(|t| t.kind == TokenKind::LeftParen);
                        if fold_ident(tok) == table_name && !is_call {
                            push_column(&mut found, fold_ident(col_tok), columns);
                        }
                    }
                    i += 3;
                    continue;
                }
                let is_call = next.is_some_and(|n| n.kind == TokenKind::LeftParen);
                if !after_dot && !is_call && subquery_depths.is_empty() {
                    push_column(&mut found, fold_ident(tok), columns);
                }
            }
            _ => {}
        }
        i += 1;
    }
    found
}

fn push_column(found: &mut Vec<String>, candidate: String, columns: &[String]) {
    if columns.contains(&candidate) && !found.contains(&candidate) {
        found.push(candidate);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::scan;
    use indoc::indoc;

    fn fold_sql(sql: &str) -> Vec<Table> {
        fold(&scan("schema.sql", sql).statements, "public")
    }

    #[test]
    fn test_columns_and_inline_constraints() {
        let tables = fold_sql(indoc! {r#"
            CREATE TABLE public.orders (
              id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
              user_id uuid NOT NULL REFERENCES auth.users (id) ON DELETE CASCADE,
              amount numeric(10, 2) NOT NULL CHECK (amount >= 0),
              tags text[],
              payload jsonb DEFAULT '{}'::jsonb NOT NULL,
              search tsvector,
              seq bigserial
            );
        "#});
        assert_eq!(tables.len(), 1);
        let t = &tables[0];
        assert_eq!(t.columns.len(), 7);

        let id = t.column("id").unwrap();
        assert!(!id.nullable);
        assert!(id.has_default);
        assert!(t.has_primary_key());

        let user_id = t.column("user_id").unwrap();
        assert!(!user_id.nullable);
        assert_eq!(user_id.line, 3);
        let fk = t
            .constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::ForeignKey)
            .unwrap();
        let target = fk.references.as_ref().unwrap();
        assert_eq!(target.table.qualified(), "auth.users");
        assert_eq!(target.columns, vec!["id"]);
        assert_eq!(target.on_delete.as_deref(), Some("CASCADE"));
        assert_eq!(target.on_update, None);
        assert_eq!(fk.name, None);

        assert_eq!(t.column("amount").unwrap().data_type, "numeric(10, 2)");
        assert!(t.column("tags").unwrap().is_array);
        let payload = t.column("payload").unwrap();
        assert!(payload.is_jsonb && payload.has_default && !payload.nullable);
        assert!(t.column("search").unwrap().is_tsvector);
        assert!(t.column("seq").unwrap().has_default);
        assert!(t
            .constraints
            .iter()
            .any(|c| c.kind == ConstraintKind::Check && c.name.is_none()));
    }

    #[test]
    fn test_table_level_named_constraints() {
        let tables = fold_sql(indoc! {r#"
            CREATE TABLE members (
              org_id uuid,
              user_id uuid,
              CONSTRAINT pk_members PRIMARY KEY (org_id, user_id),
              CONSTRAINT fk_members_org FOREIGN KEY (org_id) REFERENCES orgs (id)
                ON DELETE SET NULL ON UPDATE NO ACTION,
              CONSTRAINT "UQ members" UNIQUE (user_id)
            );
        "#});
        let t = &tables[0];
        let names: Vec<Option<&str>> = t.constraints.iter().map(|c| c.name.as_deref()).collect();
        assert_eq!(
            names,
            vec![Some("pk_members"), Some("fk_members_org"), Some("UQ members")]
        );
        assert_eq!(t.constraints[0].columns, vec!["org_id", "user_id"]);
        let fk = t.constraints[1].references.as_ref().unwrap();
        assert_eq!(fk.on_delete.as_deref(), Some("SET NULL"));
        assert_eq!(fk.on_update.as_deref(), Some("NO ACTION"));
        assert!(t.is_leading_indexed("org_id"));
        assert!(t.is_leading_indexed("user_id"));
    }

    #[test]
    fn test_identity_and_generated_columns_have_defaults() {
        let tables = fold_sql(
            "CREATE TABLE t (id bigint GENERATED ALWAYS AS IDENTITY, total int GENERATED ALWAYS AS (1 + 1) STORED NOT NULL);",
        );
        let t = &tables[0];
        assert!(t.column("id").unwrap().has_default);
        let total = t.column("total").unwrap();
        assert!(total.has_default);
        assert!(!total.nullable);
    }

    #[test]
    fn test_indexes_attach_in_any_order() {
        let tables = fold_sql(indoc! {r#"
            CREATE INDEX idx_docs_owner ON docs (owner_id);
            CREATE TABLE docs (id int PRIMARY KEY, owner_id uuid, body jsonb);
            CREATE UNIQUE INDEX uidx_docs_lower ON docs USING btree (lower(owner_id::text)) WHERE owner_id IS NOT NULL;
            CREATE INDEX idx_docs_body ON docs USING GIN (body jsonb_path_ops);
        "#});
        let t = &tables[0];
        assert_eq!(t.indexes.len(), 3);
        assert_eq!(t.indexes[0].columns, vec!["owner_id"]);
        assert_eq!(t.indexes[0].method, "btree");
        assert!(t.indexes[1].unique && t.indexes[1].partial);
        assert_ne!(t.indexes[1].columns[0], "owner_id");
        assert_eq!(t.indexes[2].method, "gin");
        assert_eq!(t.indexes[2].columns, vec!["body"]);
        assert!(t.is_leading_indexed("owner_id"));
    }

    #[test]
    fn test_alter_table_actions() {
        let tables = fold_sql(indoc! {r#"
            CREATE TABLE t (id int, note text);
            ALTER TABLE t ENABLE ROW LEVEL SECURITY, FORCE ROW LEVEL SECURITY;
            ALTER TABLE ONLY t ADD CONSTRAINT pk_t PRIMARY KEY (id);
            ALTER TABLE t ADD COLUMN IF NOT EXISTS owner_id uuid NOT NULL;
            ALTER TABLE t ALTER COLUMN note SET NOT NULL;
            ALTER TABLE t DROP COLUMN IF EXISTS missing;
        "#});
        let t = &tables[0];
        assert!(t.rls_enabled && t.rls_forced);
        assert!(t.has_primary_key());
        assert!(!t.column("owner_id").unwrap().nullable);
        assert!(!t.column("note").unwrap().nullable);
        assert_eq!(t.columns.len(), 3);
    }

    #[test]
    fn test_disable_rls_after_enable() {
        let tables = fold_sql(indoc! {r#"
            CREATE TABLE t (id int);
            ALTER TABLE t ENABLE ROW LEVEL SECURITY;
            ALTER TABLE t DISABLE ROW LEVEL SECURITY;
        "#});
        assert!(!tables[0].rls_enabled);
    }

    #[test]
    fn test_policy_parsing_and_referenced_columns() {
        let tables = fold_sql(indoc! {r#"
            CREATE TABLE public.orders (id uuid PRIMARY KEY, user_id uuid, org_id uuid, status text);
            CREATE POLICY "Orders owner update" ON public.orders AS PERMISSIVE FOR UPDATE
              TO authenticated
              USING (auth.uid() = user_id)
              WITH CHECK (auth.uid() = orders.user_id AND status <> 'closed');
            CREATE POLICY orders_org ON orders FOR SELECT USING (
              org_id IN (SELECT m.org_id FROM members m WHERE m.user_id = auth.uid())
            );
            CREATE POLICY orders_deny ON orders AS RESTRICTIVE USING (true);
        "#});
        let t = &tables[0];
        assert_eq!(t.policies.len(), 3);

        let update = &t.policies[0];
        assert_eq!(update.name, "Orders owner update");
        assert_eq!(update.command, PolicyCommand::Update);
        assert_eq!(update.roles, vec!["authenticated"]);
        assert_eq!(update.using.as_deref(), Some("auth.uid() = user_id"));
        assert_eq!(update.referenced_columns, vec!["user_id", "status"]);

        let org = &t.policies[1];
        assert_eq!(org.command, PolicyCommand::Select);
        assert_eq!(org.referenced_columns, vec!["org_id"]);

        let deny = &t.policies[2];
        assert!(!deny.permissive);
        assert_eq!(deny.command, PolicyCommand::All);
        assert_eq!(deny.using.as_deref(), Some("true"));
        assert!(deny.referenced_columns.is_empty());
    }

    #[test]
    fn test_policy_on_undefined_table_ignored() {
        let tables = fold_sql("CREATE POLICY p ON elsewhere USING (true);");
        assert!(tables.is_empty());
    }

    #[test]
    fn test_schema_qualification_resolution() {
        let tables = fold_sql(indoc! {r#"
            CREATE TABLE orders (id int);
            CREATE TABLE app.orders (id int);
            ALTER TABLE public.orders ENABLE ROW LEVEL SECURITY;
        "#});
        assert_eq!(tables.len(), 2);
        assert!(tables[0].rls_enabled);
        assert!(!tables[1].rls_enabled);
    }

    #[test]
    fn test_parse_enum_and_composite_types() {
        let out = scan(
            "t.sql",
            "CREATE TYPE \"OrderStatus\" AS ENUM ('open', 'it''s');\nCREATE TYPE addr AS (streetName text, zip text);",
        );
        let e = parse_type(&out.statements[0]).unwrap();
        assert_eq!(e.kind, TypeKind::Enum);
        assert_eq!(e.name.raw, "OrderStatus");
        assert_eq!(e.labels, vec!["open", "it's"]);
        let c = parse_type(&out.statements[1]).unwrap();
        assert_eq!(c.kind, TypeKind::Composite);
        assert_eq!(c.attributes[0].raw_name, "streetName");
        assert_eq!(c.attributes[0].line, 2);
    }

    #[test]
    fn test_predicate_columns_function_calls_excluded() {
        let cols = vec!["user_id".to_owned(), "uid".to_owned()];
        let found = predicate_columns("auth.uid() = user_id OR is_admin(uid)", "t", &cols);
        assert_eq!(found, vec!["user_id", "uid"]);
    }

    #[test]
    fn test_policy_command_coverage() {
        assert!(PolicyCommand::All.covers(Operation::Delete));
        assert!(PolicyCommand::Select.covers(Operation::Select));
        assert!(!PolicyCommand::Select.covers(Operation::Insert));
        assert!(PolicyCommand::Update.writes());
        assert!(!PolicyCommand::Delete.writes());
    }
}
