//! Scenario execution against a live database.
//!
//! Every scenario runs in its own transaction on its own pooled connection:
//! fixtures are written under the connection's role, the probing identity is
//! applied with `SET LOCAL`, the probe runs, and the transaction is rolled
//! back. Nothing a scenario writes survives it.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Connection, Row};
use uuid::Uuid;

use crate::config::HarnessConfig;
use crate::harness::context::SecurityContext;
use crate::harness::scenario::{ProbeTarget, RowSpec, Scenario, Step};
use crate::harness::HarnessError;
use crate::types::{DenialReason, Operation, Outcome};

/// A live column as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// `format_type()` output, usable in a cast.
    pub data_type: String,
    /// `pg_type.typcategory`.
    pub category: char,
    pub nullable: bool,
    pub has_default: bool,
    /// Generated or `GENERATED ALWAYS AS IDENTITY`; never written.
    pub generated: bool,
    /// Labels of an enum type, in sort order.
    pub enum_labels: Vec<String>,
}

/// A live table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    pub rls_enabled: bool,
    pub columns: Vec<ColumnInfo>,
    /// Single-column primary key, if the table has one.
    pub primary_key: Option<String>,
}

impl TableInfo {
    #[must_use]
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Quoted name for use in SQL text.
    #[must_use]
    pub fn sql_name(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The first of `candidates` present in the table.
    #[must_use]
    pub fn first_column_of<'c>(&self, candidates: &'c [String]) -> Option<&'c str> {
        candidates
            .iter()
            .find(|c| self.column(c).is_some())
            .map(String::as_str)
    }
}

/// Where scenarios execute. The Postgres implementation is [`PgExecutor`];
/// tests substitute their own.
#[async_trait]
pub trait ProbeBackend: Send + Sync {
    /// Ordinary and partitioned tables of `schema`, ordered by name.
    async fn describe_tables(&self, schema: &str) -> Result<Vec<TableInfo>, HarnessError>;

    /// One table by possibly schema-qualified name; `None` when absent.
    async fn describe_table(&self, name: &str) -> Result<Option<TableInfo>, HarnessError>;

    /// Run one scenario in an isolated session and report what the probe saw.
    async fn run_scenario(
        &self,
        scenario: &Scenario,
        table: &TableInfo,
    ) -> Result<Outcome, HarnessError>;
}

/// Quote an identifier the way `quote_ident()` does.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    let plain = ident
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && ident
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        ident.to_owned()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

/// Map a SQLSTATE to a denial. `None` means the error is not a denial.
///
/// Only insufficient privilege (42501) counts; Postgres raises it for RLS
/// `WITH CHECK` violations too.
#[must_use]
pub fn denial_for(code: &str, message: &str) -> Option<DenialReason> {
    (code == "42501").then(|| DenialReason::PermissionDenied {
        code: code.to_owned(),
        message: message.to_owned(),
    })
}

/// Explain an integrity-constraint error (class 23) as a fixture problem.
///
/// These fire before or regardless of RLS, so they say nothing about the
/// policies under test.
#[must_use]
pub fn fixture_problem(code: &str, message: &str) -> Option<String> {
    let hint = match code {
        "23503" => "a referenced row is missing; configure the users/tenants/membership fixtures",
        "23502" => "a required column got no value; give it a default or an owner/tenant column mapping",
        c if c.starts_with("23") => "the synthesized row does not satisfy a table constraint",
        _ => return None,
    };
    Some(format!("{hint} ({code}: {message})"))
}

/// Verdict for a database error raised by an isolation check.
///
/// `None` means the error is neither a verdict nor a known fixture problem.
pub fn verdict_for(code: &str, message: &str, timeout_ms: u64) -> Option<Result<Outcome, HarnessError>> {
    if code == "57014" {
        return Some(Err(HarnessError::Timeout(timeout_ms)));
    }
    if let Some(detail) = denial_for(code, message) {
        return Some(Ok(Outcome::Denied { detail }));
    }
    fixture_problem(code, message).map(|m| Err(HarnessError::Fixture(m)))
}

// ---------------------------------------------------------------------------
// Row synthesis
// ---------------------------------------------------------------------------

/// One value of a synthesized row, bound as text and cast to its column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundValue {
    pub column: String,
    pub value: String,
    pub data_type: String,
}

/// Build the column values for inserting `spec` into `table`.
///
/// Explicit values win, then the owner and tenant ids, then a fresh primary
/// key. Remaining NOT NULL columns without a default get a placeholder for
/// their type category.
///
/// # Errors
///
/// Returns [`HarnessError::Fixture`] when a required column has a type no
/// placeholder exists for.
pub fn synthesize_row(
    table: &TableInfo,
    spec: &RowSpec,
    config: &HarnessConfig,
) -> Result<Vec<BoundValue>, HarnessError> {
    let owner = table.first_column_of(&config.owner_columns);
    let tenant = table.first_column_of(&config.tenant_columns);
    let mut row = Vec::new();

    for col in &table.columns {
        if col.generated {
            continue;
        }
        let explicit = spec
            .values
            .iter()
            .find(|(name, _)| *name == col.name)
            .map(|(_, v)| v.clone());
        let value = if explicit.is_some() {
            explicit
        } else if Some(col.name.as_str()) == owner && spec.owner.is_some() {
            spec.owner.map(|id| id.to_string())
        } else if Some(col.name.as_str()) == tenant && spec.tenant.is_some() {
            spec.tenant.map(|id| id.to_string())
        } else if col.nullable || col.has_default {
            None
        } else {
            let fresh = table.primary_key.as_deref() == Some(col.name.as_str());
            Some(placeholder(table, col, fresh)?)
        };
        if let Some(value) = value {
            row.push(BoundValue {
                column: col.name.clone(),
                value,
                data_type: col.data_type.clone(),
            });
        }
    }
    Ok(row)
}

fn placeholder(table: &TableInfo, col: &ColumnInfo, fresh: bool) -> Result<String, HarnessError> {
    let id = Uuid::new_v4();
    let value = match col.category {
        'E' => col.enum_labels.first().cloned(),
        'A' => Some("{}".to_owned()),
        'S' => Some(format!("rlsguard-{}", &id.simple().to_string()[..8])),
        // Fresh keys stay inside int4 so concurrent scenarios never block on each other.
        'N' if fresh => Some(((id.as_u128() % 2_000_000_000) + 1).to_string()),
        'N' => Some("1".to_owned()),
        'B' => Some("false".to_owned()),
        'D' => Some("now".to_owned()),
        'T' => Some("1 day".to_owned()),
        'I' => Some("127.0.0.1".to_owned()),
        'U' => match col.data_type.as_str() {
            "uuid" => Some(id.to_string()),
            "json" | "jsonb" => Some("{}".to_owned()),
            "bytea" => Some("\\x".to_owned()),
            _ => None,
        },
        _ => None,
    };
    value.ok_or_else(|| {
        HarnessError::Fixture(format!(
            "cannot synthesize a value for {}.{} of type {}",
            table.qualified(),
            col.name,
            col.data_type
        ))
    })
}

/// `INSERT` text for `row` with `$n::text::type` placeholders.
fn insert_sql(table: &TableInfo, row: &[BoundValue], returning: Option<&str>) -> String {
    let mut sql = if row.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", table.sql_name())
    } else {
        let columns: Vec<String> = row.iter().map(|v| quote_ident(&v.column)).collect();
        let params: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, v)| format!("${}::text::{}", i + 1, v.data_type))
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.sql_name(),
            columns.join(", "),
            params.join(", ")
        )
    };
    if let Some(key) = returning {
        sql.push_str(&format!(" RETURNING {}::text", quote_ident(key)));
    }
    sql
}

// ---------------------------------------------------------------------------
// Catalog queries
// ---------------------------------------------------------------------------

const TABLE_SQL: &str = "\
SELECT n.nspname::text, c.relname::text, c.relrowsecurity
FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE c.oid = to_regclass($1::text) AND c.relkind IN ('r', 'p')";

const COLUMNS_SQL: &str = "\
SELECT a.attname::text,
       format_type(a.atttypid, a.atttypmod),
       t.typcategory::text,
       NOT a.attnotnull,
       a.atthasdef OR a.attidentity = 'd',
       a.attgenerated <> '' OR a.attidentity = 'a',
       ARRAY(SELECT e.enumlabel::text FROM pg_enum e
             WHERE e.enumtypid = a.atttypid ORDER BY e.enumsortorder)
FROM pg_attribute a JOIN pg_type t ON t.oid = a.atttypid
WHERE a.attrelid = $1::text::regclass AND a.attnum > 0 AND NOT a.attisdropped
ORDER BY a.attnum";

const PRIMARY_KEY_SQL: &str = "\
SELECT a.attname::text
FROM pg_index i
JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
WHERE i.indrelid = $1::text::regclass AND i.indisprimary";

const LIST_SQL: &str = "\
SELECT c.relname::text
FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND c.relkind IN ('r', 'p') AND NOT c.relispartition
ORDER BY c.relname";

async fn describe(conn: &mut PgConnection, name: &str) -> Result<Option<TableInfo>, sqlx::Error> {
    let Some(row) = sqlx::query(TABLE_SQL).bind(name).fetch_optional(&mut *conn).await? else {
        return Ok(None);
    };
    let schema: String = row.try_get(0)?;
    let relname: String = row.try_get(1)?;
    let regclass = format!("{}.{}", quote_ident(&schema), quote_ident(&relname));

    let columns = sqlx::query(COLUMNS_SQL)
        .bind(&regclass)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|r| -> Result<ColumnInfo, sqlx::Error> {
            let category: String = r.try_get(2)?;
            Ok(ColumnInfo {
                name: r.try_get(0)?,
                data_type: r.try_get(1)?,
                category: category.chars().next().unwrap_or('X'),
                nullable: r.try_get(3)?,
                has_default: r.try_get(4)?,
                generated: r.try_get(5)?,
                enum_labels: r.try_get(6)?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let key_columns: Vec<String> = sqlx::query_scalar(PRIMARY_KEY_SQL)
        .bind(&regclass)
        .fetch_all(&mut *conn)
        .await?;
    let primary_key = match key_columns.as_slice() {
        [only] => Some(only.clone()),
        _ => None,
    };

    Ok(Some(TableInfo {
        schema,
        name: relname,
        rls_enabled: row.try_get(2)?,
        columns,
        primary_key,
    }))
}

// ---------------------------------------------------------------------------
// Postgres executor
// ---------------------------------------------------------------------------

/// Runs scenarios over a connection pool.
pub struct PgExecutor {
    pool: PgPool,
    config: HarnessConfig,
}

impl PgExecutor {
    #[must_use]
    pub fn new(pool: PgPool, config: HarnessConfig) -> Self {
        Self { pool, config }
    }

    async fn session(
        &self,
        conn: &mut PgConnection,
        scenario: &Scenario,
        table: &TableInfo,
    ) -> Result<Outcome, HarnessError> {
        let mut tx = conn.begin().await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.config.probe_timeout_ms
        ))
        .execute(&mut *tx)
        .await?;

        let outcome = match self.run_steps(&mut *tx, scenario, table).await {
            Ok(seeded) => match apply_context(&mut *tx, &scenario.probe_context, &self.config).await {
                Ok(()) => self.probe(&mut *tx, scenario, table, seeded.as_deref()).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        let rolled_back = tx.rollback().await;
        let outcome = outcome?;
        rolled_back?;
        Ok(outcome)
    }

    /// Execute fixture steps; returns the seeded row's key if one was seeded.
    async fn run_steps(
        &self,
        conn: &mut PgConnection,
        scenario: &Scenario,
        table: &TableInfo,
    ) -> Result<Option<String>, HarnessError> {
        let fixtures = &self.config.fixtures;
        let mut seeded = None;
        for step in &scenario.setup {
            let result = match step {
                Step::CreateUser(id) => match fixtures.users_table {
                    Some(ref users) => {
                        self.insert_fixture(conn, users, vec![(fixtures.users_id_column.clone(), id.to_string())])
                            .await
                    }
                    None => Ok(()),
                },
                Step::CreateTenant(id) => match fixtures.tenants_table {
                    Some(ref tenants) => {
                        self.insert_fixture(
                            conn,
                            tenants,
                            vec![(fixtures.tenants_id_column.clone(), id.to_string())],
                        )
                        .await
                    }
                    None => Ok(()),
                },
                Step::AddMembership { user, tenant, role } => match fixtures.membership {
                    Some(ref m) => {
                        let mut values = vec![
                            (m.user_column.clone(), user.to_string()),
                            (m.tenant_column.clone(), tenant.to_string()),
                        ];
                        if let (Some(col), Some(role)) = (&m.role_column, role) {
                            values.push((col.clone(), role.clone()));
                        }
                        self.insert_fixture(conn, &m.table, values).await
                    }
                    None => Ok(()),
                },
                Step::RemoveMembership { user, tenant } => match fixtures.membership {
                    Some(ref m) => self.remove_membership(conn, m, *user, *tenant).await,
                    None => Ok(()),
                },
                Step::SeedRow(spec) => self.seed_row(conn, table, spec).await.map(|key| seeded = key),
                Step::SetProfileRole { user, role } => self.set_profile_role(conn, *user, role).await,
            };
            result.map_err(|e| fixture_error(step, e))?;
        }
        Ok(seeded)
    }

    /// Insert one synthesized row; returns its key when the table has one.
    async fn seed_row(
        &self,
        conn: &mut PgConnection,
        table: &TableInfo,
        spec: &RowSpec,
    ) -> Result<Option<String>, HarnessError> {
        let row = synthesize_row(table, spec, &self.config)?;
        let sql = insert_sql(table, &row, table.primary_key.as_deref());
        let mut query = sqlx::query(&sql);
        for v in &row {
            query = query.bind(&v.value);
        }
        if table.primary_key.is_some() {
            let key: String = query.fetch_one(&mut *conn).await?.try_get(0)?;
            Ok(Some(key))
        } else {
            query.execute(&mut *conn).await?;
            Ok(None)
        }
    }

    async fn fixture_table(&self, conn: &mut PgConnection, name: &str) -> Result<TableInfo, HarnessError> {
        describe(conn, name)
            .await?
            .ok_or_else(|| HarnessError::Fixture(format!("fixture table '{name}' not found")))
    }

    async fn insert_fixture(
        &self,
        conn: &mut PgConnection,
        table_name: &str,
        values: Vec<(String, String)>,
    ) -> Result<(), HarnessError> {
        let table = self.fixture_table(conn, table_name).await?;
        let spec = RowSpec {
            values,
            ..RowSpec::default()
        };
        let row = synthesize_row(&table, &spec, &self.config)?;
        let sql = insert_sql(&table, &row, None);
        let mut query = sqlx::query(&sql);
        for v in &row {
            query = query.bind(&v.value);
        }
        query.execute(&mut *conn).await?;
        Ok(())
    }

    async fn remove_membership(
        &self,
        conn: &mut PgConnection,
        membership: &crate::config::MembershipFixture,
        user: Uuid,
        tenant: Uuid,
    ) -> Result<(), HarnessError> {
        let table = self.fixture_table(conn, &membership.table).await?;
        let sql = format!(
            "DELETE FROM {} WHERE {}::text = $1 AND {}::text = $2",
            table.sql_name(),
            quote_ident(&membership.user_column),
            quote_ident(&membership.tenant_column)
        );
        sqlx::query(&sql)
            .bind(user.to_string())
            .bind(tenant.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Update the user's profile role, inserting the profile when absent.
    async fn set_profile_role(
        &self,
        conn: &mut PgConnection,
        user: Uuid,
        role: &str,
    ) -> Result<(), HarnessError> {
        let Some(ref profile) = self.config.fixtures.profile else {
            return Ok(());
        };
        let table = self.fixture_table(conn, &profile.table).await?;
        let role_type = table
            .column(&profile.role_column)
            .map(|c| c.data_type.clone())
            .ok_or_else(|| {
                HarnessError::Fixture(format!(
                    "profile table '{}' has no column '{}'",
                    profile.table, profile.role_column
                ))
            })?;
        let sql = format!(
            "UPDATE {} SET {} = $2::text::{role_type} WHERE {}::text = $1",
            table.sql_name(),
            quote_ident(&profile.role_column),
            quote_ident(&profile.user_column)
        );
        let updated = sqlx::query(&sql)
            .bind(user.to_string())
            .bind(role)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        if updated == 0 {
            let values = vec![
                (profile.user_column.clone(), user.to_string()),
                (profile.role_column.clone(), role.to_owned()),
            ];
            self.insert_fixture(conn, &profile.table, values).await?;
        }
        Ok(())
    }

    async fn probe(
        &self,
        conn: &mut PgConnection,
        scenario: &Scenario,
        table: &TableInfo,
        seeded: Option<&str>,
    ) -> Result<Outcome, HarnessError> {
        let (column, value) = match scenario.target {
            ProbeTarget::NewRow(ref spec) => {
                let row = synthesize_row(table, spec, &self.config)?;
                let sql = insert_sql(table, &row, None);
                let mut query = sqlx::query(&sql);
                for v in &row {
                    query = query.bind(&v.value);
                }
                let result = query.execute(&mut *conn).await.map(|r| Outcome::Allowed {
                    rows: r.rows_affected(),
                });
                return self.classify(result);
            }
            ProbeTarget::SeededRow => {
                let (key, id) = table.primary_key.as_deref().zip(seeded).ok_or_else(|| {
                    HarnessError::Fixture(format!("no seeded row to probe in {}", table.qualified()))
                })?;
                (key.to_owned(), id.to_owned())
            }
            ProbeTarget::RowWhere {
                ref column,
                ref value,
            } => (column.clone(), value.clone()),
        };
        let key = quote_ident(&column);
        let target = table.sql_name();

        let result = match scenario.operation {
            Operation::Select => {
                let sql = format!("SELECT count(*) FROM {target} WHERE {key}::text = $1");
                sqlx::query_scalar::<_, i64>(&sql)
                    .bind(&value)
                    .fetch_one(&mut *conn)
                    .await
                    .map(|n| match u64::try_from(n).unwrap_or(0) {
                        0 => Outcome::Denied {
                            detail: DenialReason::NoRowsVisible,
                        },
                        rows => Outcome::Allowed { rows },
                    })
            }
            Operation::Update => {
                let set = match scenario.assign {
                    Some((ref col, _)) => {
                        let data_type = table
                            .column(col)
                            .map_or("text", |c| c.data_type.as_str());
                        format!("{} = $2::text::{data_type}", quote_ident(col))
                    }
                    None => format!("{key} = {key}"),
                };
                let sql = format!("UPDATE {target} SET {set} WHERE {key}::text = $1");
                let mut query = sqlx::query(&sql).bind(&value);
                if let Some((_, ref assigned)) = scenario.assign {
                    query = query.bind(assigned);
                }
                query.execute(&mut *conn).await.map(|r| affected(r.rows_affected()))
            }
            Operation::Delete => {
                let sql = format!("DELETE FROM {target} WHERE {key}::text = $1");
                sqlx::query(&sql)
                    .bind(&value)
                    .execute(&mut *conn)
                    .await
                    .map(|r| affected(r.rows_affected()))
            }
            Operation::Insert => {
                return Err(HarnessError::Fixture(format!(
                    "{}: INSERT probes need a new row",
                    scenario.name
                )))
            }
        };
        self.classify(result)
    }

    /// Turn a check's database error into a verdict when it is one.
    fn classify(&self, result: Result<Outcome, sqlx::Error>) -> Result<Outcome, HarnessError> {
        match result {
            Ok(outcome) => Ok(outcome),
            Err(sqlx::Error::Database(db)) => {
                let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
                verdict_for(&code, db.message(), self.config.probe_timeout_ms)
                    .unwrap_or_else(|| Err(HarnessError::Database(sqlx::Error::Database(db))))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn affected(rows: u64) -> Outcome {
    if rows == 0 {
        Outcome::Denied {
            detail: DenialReason::NoRowsAffected,
        }
    } else {
        Outcome::Allowed { rows }
    }
}

/// Database errors during setup are fixture problems, not verdicts.
fn fixture_error(step: &Step, err: HarnessError) -> HarnessError {
    match err {
        HarnessError::Database(db) => HarnessError::Fixture(format!("{} failed: {db}", step_name(step))),
        other => other,
    }
}

fn step_name(step: &Step) -> &'static str {
    match step {
        Step::CreateUser(_) => "creating user",
        Step::CreateTenant(_) => "creating tenant",
        Step::AddMembership { .. } => "adding membership",
        Step::RemoveMembership { .. } => "removing membership",
        Step::SeedRow(_) => "seeding row",
        Step::SetProfileRole { .. } => "setting profile role",
    }
}

/// Assume `context` for the rest of the transaction.
async fn apply_context(
    conn: &mut PgConnection,
    context: &SecurityContext,
    config: &HarnessConfig,
) -> Result<(), HarnessError> {
    context.validate()?;
    let identity_error = |e: sqlx::Error| HarnessError::Identity {
        identity: context.label.clone(),
        reason: e.to_string(),
    };
    sqlx::query(
        "SELECT set_config($1, $2, true), \
                set_config('request.jwt.claim.sub', $3, true), \
                set_config('request.jwt.claim.role', $4, true)",
    )
    .bind(&config.claims_setting)
    .bind(context.claims_json().to_string())
    .bind(context.subject_claim())
    .bind(&context.claims.role)
    .execute(&mut *conn)
    .await
    .map_err(identity_error)?;
    sqlx::query(&format!("SET LOCAL ROLE {}", quote_ident(&context.claims.role)))
        .execute(&mut *conn)
        .await
        .map_err(identity_error)?;
    Ok(())
}

#[async_trait]
impl ProbeBackend for PgExecutor {
    async fn describe_tables(&self, schema: &str) -> Result<Vec<TableInfo>, HarnessError> {
        let mut conn = self.pool.acquire().await?;
        let names: Vec<String> = sqlx::query_scalar(LIST_SQL)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await?;
        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let qualified = format!("{}.{}", quote_ident(schema), quote_ident(&name));
            if let Some(table) = describe(&mut conn, &qualified).await? {
                tables.push(table);
            }
        }
        log::debug!("Found {} table(s) in schema {schema}", tables.len());
        Ok(tables)
    }

    async fn describe_table(&self, name: &str) -> Result<Option<TableInfo>, HarnessError> {
        let mut conn = self.pool.acquire().await?;
        Ok(describe(&mut conn, name).await?)
    }

    async fn run_scenario(
        &self,
        scenario: &Scenario,
        table: &TableInfo,
    ) -> Result<Outcome, HarnessError> {
        scenario.probe_context.validate()?;
        let limit = Duration::from_millis(self.config.probe_timeout_ms);
        let mut conn = self.pool.acquire().await?;
        let result = tokio::time::timeout(limit, self.session(&mut conn, scenario, table)).await;
        match result {
            Ok(outcome) => outcome,
            Err(_) => {
                // The session may be mid-statement; never hand it back to the pool.
                conn.close_on_drop();
                Err(HarnessError::Timeout(self.config.probe_timeout_ms))
            }
        }
    }
}
