//! Configuration loading and resolution.
//!
//! Resolution order (first found wins, later files are not consulted):
//! 1. An explicit `--config` path (TOML or YAML by extension)
//! 2. `rlsguard.toml` in the project root
//! 3. `.rlsguard.yaml` / `.rlsguard.yml` in the project root
//! 4. Built-in defaults
//!
//! A file carries a `[check]` section for the static analyzer and a
//! `[harness]` section for the live test harness. CLI flags are applied by
//! the binaries on top of the loaded values.
//!
//! Per-path overrides allow different rule configurations for different
//! directory subtrees (e.g., relaxed naming rules for `legacy/`).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{Operation, Severity};

// ---------------------------------------------------------------------------
// Rule severity override
// ---------------------------------------------------------------------------

/// Per-rule severity override, or `Off` to disable a rule entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverityOverride {
    /// Override severity to Error.
    Error,
    /// Override severity to Warning.
    Warning,
    /// Override severity to Info.
    Info,
    /// Disable the rule entirely.
    Off,
}

impl RuleSeverityOverride {
    /// The overriding severity, or `default` for `Off`.
    fn severity_or(&self, default: Severity) -> Severity {
        match self {
            Self::Error => Severity::Error,
            Self::Warning => Severity::Warning,
            Self::Info => Severity::Info,
            Self::Off => default,
        }
    }
}

// ---------------------------------------------------------------------------
// Naming config
// ---------------------------------------------------------------------------

/// Configuration for naming convention checks (NAME001-NAME006).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Accepted constraint name prefixes (NAME004).
    pub constraint_prefixes: Vec<String>,
    /// Accepted index name prefixes (NAME005).
    pub index_prefixes: Vec<String>,
    /// Identifiers exempt from all naming rules, compared case-insensitively.
    pub allow: Vec<String>,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            constraint_prefixes: ["pk_", "fk_", "uq_", "ck_"]
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            index_prefixes: ["idx_", "uidx_"].iter().map(|s| (*s).to_owned()).collect(),
            allow: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// RLS config
// ---------------------------------------------------------------------------

/// Configuration for row-level security checks (RLS001-RLS006).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RlsConfig {
    /// Tables (bare or schema-qualified) that intentionally have no RLS.
    pub exempt_tables: Vec<String>,
}

// ---------------------------------------------------------------------------
// Per-path override
// ---------------------------------------------------------------------------

/// Per-path rule overrides using glob patterns.
///
/// Most specific path wins when multiple overrides match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerPathOverride {
    /// Glob pattern to match file paths against.
    pub path: String,
    /// Rule ID → severity override for files matching this glob.
    pub rules: HashMap<String, RuleSeverityOverride>,
}

// ---------------------------------------------------------------------------
// Static analyzer config
// ---------------------------------------------------------------------------

/// Static analyzer configuration.
///
/// Loaded via the resolution order, then optionally overridden by CLI flags.
/// Passed to every rule by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Whether warnings should cause a non-zero exit code.
    pub fail_on_warnings: bool,

    /// Maximum number of diagnostics to report (0 = unlimited).
    pub max_diagnostics: usize,

    /// Schema whose tables must be protected by RLS; unqualified names
    /// resolve to it.
    pub target_schema: String,

    /// Additional file/directory exclusion patterns (beyond `.gitignore`).
    pub exclude: Vec<String>,

    /// File extensions analyzed when walking a directory.
    pub extensions: Vec<String>,

    /// Fold every discovered file into one schema before checking.
    pub merge: bool,

    /// Per-rule severity overrides (rule ID → override).
    pub rules: HashMap<String, RuleSeverityOverride>,

    /// Naming convention configuration.
    pub naming: NamingConfig,

    /// RLS rule configuration.
    pub rls: RlsConfig,

    /// Per-path rule overrides (most specific path wins).
    pub per_path: Vec<PerPathOverride>,

    /// Comma-separated rule IDs or prefixes to select.
    pub select: Option<String>,

    /// Comma-separated rule IDs or prefixes to exclude.
    pub exclude_rules: Option<String>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            fail_on_warnings: false,
            max_diagnostics: 500,
            target_schema: "public".to_owned(),
            exclude: vec![
                "target/".to_owned(),
                "node_modules/".to_owned(),
                ".git/".to_owned(),
            ],
            extensions: vec!["sql".to_owned()],
            merge: false,
            rules: HashMap::new(),
            naming: NamingConfig::default(),
            rls: RlsConfig::default(),
            per_path: Vec::new(),
            select: None,
            exclude_rules: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Harness config
// ---------------------------------------------------------------------------

/// Membership table linking users to tenants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipFixture {
    pub table: String,
    pub user_column: String,
    pub tenant_column: String,
    /// Column holding the member's role, if the table has one.
    pub role_column: Option<String>,
}

/// Profile table whose role column a user may try to escalate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFixture {
    pub table: String,
    /// Column holding the user id (often the primary key).
    pub user_column: String,
    pub role_column: String,
}

/// Tables the harness may write fixtures into. Everything is optional;
/// scenarios needing a missing fixture are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureConfig {
    /// Users table, e.g. `auth.users`.
    pub users_table: Option<String>,
    pub users_id_column: String,
    /// Tenants table, e.g. `public.organizations`.
    pub tenants_table: Option<String>,
    pub tenants_id_column: String,
    pub membership: Option<MembershipFixture>,
    pub profile: Option<ProfileFixture>,
}

/// Live harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Schema to discover candidate tables in.
    pub schema: String,
    /// Explicit tables to test; empty means discover.
    pub tables: Vec<String>,
    /// Maximum concurrently running scenarios.
    pub workers: usize,
    /// Per-scenario time bound.
    pub probe_timeout_ms: u64,
    /// Database role assumed for anonymous probes.
    pub anon_role: String,
    /// Database role assumed for signed-in probes.
    pub authenticated_role: String,
    /// Setting that receives the JSON claims document.
    pub claims_setting: String,
    /// Columns identifying the owning user, first match wins.
    pub owner_columns: Vec<String>,
    /// Columns identifying the owning tenant, first match wins.
    pub tenant_columns: Vec<String>,
    /// Application role → permitted operations.
    pub roles: BTreeMap<String, Vec<Operation>>,
    /// Fixture tables.
    pub fixtures: FixtureConfig,
    /// Stop launching scenarios after the first isolation failure.
    pub fail_fast: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let mut roles = BTreeMap::new();
        roles.insert("admin".to_owned(), Operation::ALL.to_vec());
        roles.insert(
            "editor".to_owned(),
            vec![Operation::Select, Operation::Insert, Operation::Update],
        );
        roles.insert("viewer".to_owned(), vec![Operation::Select]);
        Self {
            schema: "public".to_owned(),
            tables: Vec::new(),
            workers: 4,
            probe_timeout_ms: 5_000,
            anon_role: "anon".to_owned(),
            authenticated_role: "authenticated".to_owned(),
            claims_setting: "request.jwt.claims".to_owned(),
            owner_columns: ["user_id", "owner_id", "created_by"]
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            tenant_columns: ["organization_id", "org_id", "tenant_id", "team_id"]
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            roles,
            fixtures: FixtureConfig {
                users_id_column: "id".to_owned(),
                tenants_id_column: "id".to_owned(),
                ..FixtureConfig::default()
            },
            fail_fast: false,
        }
    }
}

/// Both configuration sections as resolved from one file.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    pub check: CheckConfig,
    pub harness: HarnessConfig,
    /// The file the values came from, `None` for built-in defaults.
    pub source: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// TOML / YAML deserialization helpers
// ---------------------------------------------------------------------------

/// Raw structure shared by `rlsguard.toml` and `.rlsguard.yaml`.
#[derive(Debug, Default, Deserialize)]
struct RawConfigFile {
    check: Option<RawCheckSection>,
    harness: Option<RawHarnessSection>,
}

/// The `[check]` section.
#[derive(Debug, Deserialize)]
struct RawCheckSection {
    fail_on_warnings: Option<bool>,
    max_diagnostics: Option<usize>,
    target_schema: Option<String>,
    exclude: Option<Vec<String>>,
    extensions: Option<Vec<String>>,
    merge: Option<bool>,
    rules: Option<HashMap<String, String>>,
    naming: Option<RawNamingSection>,
    rls: Option<RawRlsSection>,
    per_path: Option<Vec<RawPerPathSection>>,
    select: Option<String>,
    exclude_rules: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawNamingSection {
    constraint_prefixes: Option<Vec<String>>,
    index_prefixes: Option<Vec<String>>,
    allow: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawRlsSection {
    exempt_tables: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawPerPathSection {
    path: String,
    rules: Option<HashMap<String, String>>,
}

/// The `[harness]` section.
#[derive(Debug, Deserialize)]
struct RawHarnessSection {
    schema: Option<String>,
    tables: Option<Vec<String>>,
    workers: Option<usize>,
    probe_timeout_ms: Option<u64>,
    anon_role: Option<String>,
    authenticated_role: Option<String>,
    claims_setting: Option<String>,
    owner_columns: Option<Vec<String>>,
    tenant_columns: Option<Vec<String>>,
    roles: Option<BTreeMap<String, Vec<String>>>,
    fixtures: Option<RawFixtureSection>,
    fail_fast: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawFixtureSection {
    users_table: Option<String>,
    users_id_column: Option<String>,
    tenants_table: Option<String>,
    tenants_id_column: Option<String>,
    membership: Option<MembershipFixture>,
    profile: Option<ProfileFixture>,
}

/// Parse a string severity value into a [`RuleSeverityOverride`].
fn parse_rule_severity(s: &str) -> Option<RuleSeverityOverride> {
    match s.to_lowercase().as_str() {
        "error" => Some(RuleSeverityOverride::Error),
        "warning" | "warn" => Some(RuleSeverityOverride::Warning),
        "info" => Some(RuleSeverityOverride::Info),
        "off" | "disabled" | "false" => Some(RuleSeverityOverride::Off),
        _ => None,
    }
}

/// Apply a [`RawCheckSection`] onto a [`CheckConfig`], overriding any set values.
fn apply_check_section(config: &mut CheckConfig, section: &RawCheckSection) {
    if let Some(v) = section.fail_on_warnings {
        config.fail_on_warnings = v;
    }
    if let Some(v) = section.max_diagnostics {
        config.max_diagnostics = v;
    }
    if let Some(ref v) = section.target_schema {
        config.target_schema = v.to_lowercase();
    }
    if let Some(ref v) = section.exclude {
        config.exclude = v.clone();
    }
    if let Some(ref v) = section.extensions {
        config.extensions = v
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
    }
    if let Some(v) = section.merge {
        config.merge = v;
    }
    if let Some(ref rules) = section.rules {
        for (rule_id, severity_str) in rules {
            match parse_rule_severity(severity_str) {
                Some(sev) => {
                    config.rules.insert(rule_id.clone(), sev);
                }
                None => log::warn!("ignoring unknown severity '{severity_str}' for rule {rule_id}"),
            }
        }
    }
    if let Some(ref naming) = section.naming {
        if let Some(ref v) = naming.constraint_prefixes {
            config.naming.constraint_prefixes = v.clone();
        }
        if let Some(ref v) = naming.index_prefixes {
            config.naming.index_prefixes = v.clone();
        }
        if let Some(ref v) = naming.allow {
            config.naming.allow = v.clone();
        }
    }
    if let Some(ref rls) = section.rls {
        if let Some(ref v) = rls.exempt_tables {
            config.rls.exempt_tables = v.clone();
        }
    }
    if let Some(ref per_path) = section.per_path {
        for pp in per_path {
            let rules: HashMap<String, RuleSeverityOverride> = pp
                .rules
                .as_ref()
                .map(|r| {
                    r.iter()
                        .filter_map(|(k, v)| parse_rule_severity(v).map(|sev| (k.clone(), sev)))
                        .collect()
                })
                .unwrap_or_default();
            config.per_path.push(PerPathOverride {
                path: pp.path.clone(),
                rules,
            });
        }
    }
    if section.select.is_some() {
        config.select.clone_from(&section.select);
    }
    if section.exclude_rules.is_some() {
        config.exclude_rules.clone_from(&section.exclude_rules);
    }
}

/// Apply a [`RawHarnessSection`] onto a [`HarnessConfig`].
fn apply_harness_section(
    config: &mut HarnessConfig,
    section: &RawHarnessSection,
    origin: &str,
) -> Result<(), ConfigError> {
    if let Some(ref v) = section.schema {
        config.schema = v.clone();
    }
    if let Some(ref v) = section.tables {
        config.tables = v.clone();
    }
    if let Some(v) = section.workers {
        config.workers = v;
    }
    if let Some(v) = section.probe_timeout_ms {
        config.probe_timeout_ms = v;
    }
    if let Some(ref v) = section.anon_role {
        config.anon_role = v.clone();
    }
    if let Some(ref v) = section.authenticated_role {
        config.authenticated_role = v.clone();
    }
    if let Some(ref v) = section.claims_setting {
        config.claims_setting = v.clone();
    }
    if let Some(ref v) = section.owner_columns {
        config.owner_columns = v.clone();
    }
    if let Some(ref v) = section.tenant_columns {
        config.tenant_columns = v.clone();
    }
    if let Some(ref roles) = section.roles {
        let mut parsed = BTreeMap::new();
        for (role, ops) in roles {
            let mut allowed = Vec::new();
            for op in ops {
                let op = Operation::parse(op).ok_or_else(|| {
                    ConfigError::Invalid(
                        origin.to_owned(),
                        format!("role '{role}' lists unknown operation '{op}'"),
                    )
                })?;
                if !allowed.contains(&op) {
                    allowed.push(op);
                }
            }
            allowed.sort();
            parsed.insert(role.clone(), allowed);
        }
        config.roles = parsed;
    }
    if let Some(ref fixtures) = section.fixtures {
        if fixtures.users_table.is_some() {
            config.fixtures.users_table.clone_from(&fixtures.users_table);
        }
        if let Some(ref v) = fixtures.users_id_column {
            config.fixtures.users_id_column = v.clone();
        }
        if fixtures.tenants_table.is_some() {
            config.fixtures.tenants_table.clone_from(&fixtures.tenants_table);
        }
        if let Some(ref v) = fixtures.tenants_id_column {
            config.fixtures.tenants_id_column = v.clone();
        }
        if fixtures.membership.is_some() {
            config.fixtures.membership.clone_from(&fixtures.membership);
        }
        if fixtures.profile.is_some() {
            config.fixtures.profile.clone_from(&fixtures.profile);
        }
    }
    if let Some(v) = section.fail_fast {
        config.fail_fast = v;
    }
    config.validate(origin)
}

impl ProjectConfig {
    /// Resolve configuration from an explicit path or the project root.
    ///
    /// An explicit path must exist. Without one, `rlsguard.toml`, then
    /// `.rlsguard.yaml`, then `.rlsguard.yml` are tried in `root`; the first
    /// found wins. If none exist, built-in defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be read, parsed or validated.
    pub fn load(explicit: Option<&Path>, root: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_file(path);
        }
        for name in ["rlsguard.toml", ".rlsguard.yaml", ".rlsguard.yml"] {
            let candidate = root.join(name);
            if candidate.is_file() {
                return Self::load_file(&candidate);
            }
        }
        log::debug!("no config file under {}, using defaults", root.display());
        Ok(Self::default())
    }

    /// Load one config file, choosing the format by extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let origin = path.display().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(origin.clone(), e.to_string()))?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        let raw: RawConfigFile = if is_yaml {
            serde_yaml::from_str::<Option<RawConfigFile>>(&content)
                .map_err(|e| ConfigError::ParseError(origin.clone(), e.to_string()))?
                .unwrap_or_default()
        } else {
            toml::from_str(&content)
                .map_err(|e| ConfigError::ParseError(origin.clone(), e.to_string()))?
        };

        let mut config = Self {
            source: Some(path.to_path_buf()),
            ..Self::default()
        };
        if let Some(ref section) = raw.check {
            apply_check_section(&mut config.check, section);
        }
        if let Some(ref section) = raw.harness {
            apply_harness_section(&mut config.harness, section, &origin)?;
        }
        log::debug!("loaded config from {origin}");
        Ok(config)
    }
}

impl CheckConfig {
    /// Check whether a specific rule is enabled, considering the config overrides
    /// and the rule's default enabled state.
    ///
    /// Returns `true` if the rule should run, `false` if disabled.
    #[must_use]
    pub fn is_rule_enabled(&self, rule_id: &str, default_enabled: bool) -> bool {
        // Check select/exclude filters first
        if let Some(ref select) = self.select {
            let selected = select
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .any(|s| rule_id == s || rule_id.starts_with(s));
            if !selected {
                return false;
            }
        }
        if let Some(ref exclude) = self.exclude_rules {
            let excluded = exclude
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .any(|s| rule_id == s || rule_id.starts_with(s));
            if excluded {
                return false;
            }
        }

        // Check per-rule override
        if let Some(override_val) = self.rules.get(rule_id) {
            return *override_val != RuleSeverityOverride::Off;
        }

        default_enabled
    }

    /// Get the effective severity for a rule, considering config overrides.
    #[must_use]
    pub fn effective_severity(&self, rule_id: &str, default: Severity) -> Severity {
        self.rules
            .get(rule_id)
            .map_or(default, |o| o.severity_or(default))
    }

    /// Find the most specific per-path override for a rule and file.
    fn path_override(&self, rule_id: &str, file_path: &str) -> Option<&RuleSeverityOverride> {
        // Last matching entry wins, as it's the most specific
        for pp in self.per_path.iter().rev() {
            if let Ok(glob) = globset::Glob::new(&pp.path) {
                let matcher = glob.compile_matcher();
                if matcher.is_match(file_path) {
                    if let Some(override_val) = pp.rules.get(rule_id) {
                        return Some(override_val);
                    }
                }
            }
        }
        None
    }

    /// Get the effective severity for a rule considering per-path overrides.
    ///
    /// Checks per-path overrides first (most specific match wins), then falls
    /// back to the global rule override, then the default.
    #[must_use]
    pub fn effective_severity_for_path(
        &self,
        rule_id: &str,
        file_path: &str,
        default: Severity,
    ) -> Severity {
        match self.path_override(rule_id, file_path) {
            Some(o) => o.severity_or(default),
            None => self.effective_severity(rule_id, default),
        }
    }

    /// Check if a rule is enabled for a specific file path, considering per-path overrides.
    #[must_use]
    pub fn is_rule_enabled_for_path(
        &self,
        rule_id: &str,
        file_path: &str,
        default_enabled: bool,
    ) -> bool {
        match self.path_override(rule_id, file_path) {
            Some(o) => *o != RuleSeverityOverride::Off && self.is_rule_enabled(rule_id, true),
            None => self.is_rule_enabled(rule_id, default_enabled),
        }
    }

    /// Whether a naming rule should skip `identifier`.
    #[must_use]
    pub fn naming_allowed(&self, identifier: &str) -> bool {
        self.naming
            .allow
            .iter()
            .any(|a| a.eq_ignore_ascii_case(identifier))
    }

    /// Whether `table` (bare name or `schema.name`) is exempt from RLS rules.
    #[must_use]
    pub fn rls_exempt(&self, schema: &str, table: &str) -> bool {
        self.rls.exempt_tables.iter().any(|e| {
            e.eq_ignore_ascii_case(table) || e.eq_ignore_ascii_case(&format!("{schema}.{table}"))
        })
    }

    /// Compute a SHA-256 hash of the configuration.
    ///
    /// Uses canonical JSON (sorted keys) to ensure deterministic hashing
    /// regardless of HashMap iteration order.
    #[must_use]
    pub fn config_hash(&self) -> String {
        use sha2::{Digest, Sha256};

        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        let canonical = canonical_json(&value);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl HarnessConfig {
    /// Reject values the harness cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming `origin` and the bad value.
    pub fn validate(&self, origin: &str) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(origin.to_owned(), msg.to_owned()));
        if self.workers == 0 {
            return invalid("workers must be at least 1");
        }
        if self.probe_timeout_ms == 0 {
            return invalid("probe_timeout_ms must be positive");
        }
        if self.anon_role.trim().is_empty() || self.authenticated_role.trim().is_empty() {
            return invalid("anon_role and authenticated_role must be set");
        }
        if self.claims_setting.trim().is_empty() {
            return invalid("claims_setting must be set");
        }
        Ok(())
    }

    /// Operations `role` may perform; empty for unknown roles.
    #[must_use]
    pub fn capabilities(&self, role: &str) -> &[Operation] {
        self.roles.get(role).map(Vec::as_slice).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Canonical JSON for deterministic hashing
// ---------------------------------------------------------------------------

/// Produce a canonical JSON string with sorted object keys.
fn canonical_json(value: &serde_json::Value) -> String {
    let mut buf = String::new();
    write_canonical(value, &mut buf);
    buf
}

/// Recursively write a JSON value with sorted object keys.
fn write_canonical(value: &serde_json::Value, buf: &mut String) {
    use std::fmt::Write;

    match value {
        serde_json::Value::Null => buf.push_str("null"),
        serde_json::Value::Bool(b) => {
            let _ = write!(buf, "{b}");
        }
        serde_json::Value::Number(n) => {
            let _ = write!(buf, "{n}");
        }
        serde_json::Value::String(s) => {
            let _ = write!(buf, "{}", serde_json::to_string(s).unwrap_or_default());
        }
        serde_json::Value::Array(arr) => {
            buf.push('[');
            for (i, v) in arr.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                write_canonical(v, buf);
            }
            buf.push(']');
        }
        serde_json::Value::Object(map) => {
            buf.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                let _ = write!(buf, "{}", serde_json::to_string(*k).unwrap_or_default());
                buf.push(':');
                write_canonical(&map[*k], buf);
            }
            buf.push('}');
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read config file '{0}': {1}")]
    ReadError(String, String),

    /// Failed to parse a configuration file.
    #[error("Failed to parse config file '{0}': {1}")]
    ParseError(String, String),

    /// A value parsed but cannot be used.
    #[error("Invalid value in config file '{0}': {1}")]
    Invalid(String, String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CheckConfig::default();
        assert!(!config.fail_on_warnings);
        assert_eq!(config.max_diagnostics, 500);
        assert_eq!(config.target_schema, "public");
        assert!(config.rules.is_empty());
        assert_eq!(config.naming.constraint_prefixes.len(), 4);
    }

    #[test]
    fn test_default_harness_matrix() {
        let config = HarnessConfig::default();
        assert_eq!(config.capabilities("viewer"), &[Operation::Select]);
        assert_eq!(config.capabilities("admin").len(), 4);
        assert!(!config.capabilities("editor").contains(&Operation::Delete));
        assert!(config.capabilities("nobody").is_empty());
        assert!(config.validate("defaults").is_ok());
    }

    #[test]
    fn test_rule_enabled_override_off() {
        let mut config = CheckConfig::default();
        config
            .rules
            .insert("RLS003".to_owned(), RuleSeverityOverride::Off);
        assert!(!config.is_rule_enabled("RLS003", true));
        assert!(config.is_rule_enabled("RLS001", true));
    }

    #[test]
    fn test_effective_severity_override() {
        let mut config = CheckConfig::default();
        config
            .rules
            .insert("NAME005".to_owned(), RuleSeverityOverride::Error);
        assert_eq!(
            config.effective_severity("NAME005", Severity::Warning),
            Severity::Error
        );
        assert_eq!(
            config.effective_severity("NAME004", Severity::Warning),
            Severity::Warning
        );
    }

    #[test]
    fn test_select_filter() {
        let mut config = CheckConfig::default();
        config.select = Some("RLS, CON001".to_owned());
        assert!(config.is_rule_enabled("RLS001", true));
        assert!(config.is_rule_enabled("RLS006", true));
        assert!(config.is_rule_enabled("CON001", true));
        assert!(!config.is_rule_enabled("CON002", true));
        assert!(!config.is_rule_enabled("NAME001", true));
    }

    #[test]
    fn test_exclude_filter() {
        let mut config = CheckConfig::default();
        config.exclude_rules = Some("IDX003,NAME".to_owned());
        assert!(!config.is_rule_enabled("IDX003", true));
        assert!(!config.is_rule_enabled("NAME001", true));
        assert!(config.is_rule_enabled("IDX001", true));
    }

    #[test]
    fn test_per_path_override() {
        let mut config = CheckConfig::default();
        config.per_path.push(PerPathOverride {
            path: "legacy/**".to_owned(),
            rules: HashMap::from([
                ("NAME001".to_owned(), RuleSeverityOverride::Off),
                ("CON002".to_owned(), RuleSeverityOverride::Info),
            ]),
        });
        assert!(!config.is_rule_enabled_for_path("NAME001", "legacy/001_init.sql", true));
        assert!(config.is_rule_enabled_for_path("NAME001", "migrations/001_init.sql", true));
        assert_eq!(
            config.effective_severity_for_path("CON002", "legacy/a.sql", Severity::Warning),
            Severity::Info
        );
    }

    #[test]
    fn test_config_hash_changes_with_rules() {
        let config1 = CheckConfig::default();
        let mut config2 = CheckConfig::default();
        config2
            .rules
            .insert("RLS003".to_owned(), RuleSeverityOverride::Off);
        assert_ne!(config1.config_hash(), config2.config_hash());
        assert_eq!(config1.config_hash(), CheckConfig::default().config_hash());
    }

    #[test]
    fn test_rls_exempt_matching() {
        let mut config = CheckConfig::default();
        config.rls.exempt_tables = vec!["countries".to_owned(), "ref.currencies".to_owned()];
        assert!(config.rls_exempt("public", "countries"));
        assert!(config.rls_exempt("ref", "currencies"));
        assert!(!config.rls_exempt("public", "currencies"));
    }

    #[test]
    fn test_parse_rule_severity() {
        assert_eq!(parse_rule_severity("ERROR"), Some(RuleSeverityOverride::Error));
        assert_eq!(parse_rule_severity("warn"), Some(RuleSeverityOverride::Warning));
        assert_eq!(parse_rule_severity("disabled"), Some(RuleSeverityOverride::Off));
        assert_eq!(parse_rule_severity("loud"), None);
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProjectConfig::load(None, dir.path()).unwrap();
        assert!(config.source.is_none());
        assert_eq!(config.harness.workers, 4);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = ProjectConfig::load(Some(&missing), dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(..)));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let toml_content = r#"
[check]
fail_on_warnings = true
max_diagnostics = 100
target_schema = "App"
merge = true

[check.rules]
RLS003 = "off"
NAME005 = "error"

[check.naming]
index_prefixes = ["ix_"]

[[check.per_path]]
path = "legacy/**"
rules = { NAME001 = "off" }

[harness]
workers = 8
owner_columns = ["author_id"]

[harness.roles]
viewer = ["select"]
auditor = ["SELECT", "select"]

[harness.fixtures]
users_table = "auth.users"

[harness.fixtures.membership]
table = "members"
user_column = "user_id"
tenant_column = "org_id"
"#;
        std::fs::write(dir.path().join("rlsguard.toml"), toml_content).unwrap();
        let config = ProjectConfig::load(None, dir.path()).unwrap();
        let check = &config.check;
        assert!(check.fail_on_warnings);
        assert_eq!(check.max_diagnostics, 100);
        assert_eq!(check.target_schema, "app");
        assert!(check.merge);
        assert!(!check.is_rule_enabled("RLS003", true));
        assert_eq!(
            check.effective_severity("NAME005", Severity::Warning),
            Severity::Error
        );
        assert_eq!(check.naming.index_prefixes, vec!["ix_"]);
        assert!(!check.is_rule_enabled_for_path("NAME001", "legacy/x.sql", true));

        let harness = &config.harness;
        assert_eq!(harness.workers, 8);
        assert_eq!(harness.owner_columns, vec!["author_id"]);
        assert_eq!(harness.capabilities("auditor"), &[Operation::Select]);
        assert!(harness.capabilities("admin").is_empty());
        assert_eq!(harness.fixtures.users_table.as_deref(), Some("auth.users"));
        assert_eq!(harness.fixtures.users_id_column, "id");
        let membership = harness.fixtures.membership.as_ref().unwrap();
        assert_eq!(membership.tenant_column, "org_id");
        assert_eq!(membership.role_column, None);
    }

    #[test]
    fn test_load_from_yaml_when_no_toml() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = "check:\n  fail_on_warnings: true\nharness:\n  schema: app\n";
        std::fs::write(dir.path().join(".rlsguard.yml"), yaml).unwrap();
        let config = ProjectConfig::load(None, dir.path()).unwrap();
        assert!(config.check.fail_on_warnings);
        assert_eq!(config.harness.schema, "app");
    }

    #[test]
    fn test_toml_wins_over_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rlsguard.toml"), "[check]\nmax_diagnostics = 7\n").unwrap();
        std::fs::write(dir.path().join(".rlsguard.yaml"), "check:\n  max_diagnostics: 9\n")
            .unwrap();
        let config = ProjectConfig::load(None, dir.path()).unwrap();
        assert_eq!(config.check.max_diagnostics, 7);
    }

    #[test]
    fn test_empty_yaml_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.yaml");
        std::fs::write(&path, "").unwrap();
        let config = ProjectConfig::load(Some(&path), dir.path()).unwrap();
        assert_eq!(config.check.max_diagnostics, 500);
    }

    #[test]
    fn test_invalid_harness_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[harness]\nworkers = 0\n").unwrap();
        let err = ProjectConfig::load(Some(&path), dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(..)));

        std::fs::write(&path, "[harness.roles]\nviewer = [\"peek\"]\n").unwrap();
        let err = ProjectConfig::load(Some(&path), dir.path()).unwrap_err();
        assert!(err.to_string().contains("peek"));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rlsguard.toml");
        std::fs::write(&path, "[check\n").unwrap();
        let err = ProjectConfig::load(None, dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(..)));
    }
}
