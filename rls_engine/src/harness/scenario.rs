//! Scenario library.
//!
//! [`catalog`] instantiates the scenario templates that apply to one live
//! table; [`profile_escalation`] adds the run-level profile probe. Each
//! scenario carries its own fixture steps and fresh ids, so scenarios share
//! no state and may run in any order.
//!
//! Families:
//! - `anonymous.*`: the anonymous role can neither read nor insert.
//! - `user_isolation.*`: user B cannot touch user A's row; A can read it.
//! - `tenant_isolation.*`: a member of tenant Y cannot touch tenant X's row;
//!   a member of X can read it; a removed member loses access.
//! - `role.*`: each configured application role gets exactly its
//!   capabilities; user-writable claims do not escalate.
//!
//! A template whose prerequisite is missing becomes an Info diagnostic
//! (DYN001) instead of a scenario.

use uuid::Uuid;

use crate::config::HarnessConfig;
use crate::harness::context::SecurityContext;
use crate::harness::executor::TableInfo;
use crate::types::{Diagnostic, ExpectedOutcome, Operation, RuleCategory, Severity};

/// Values for a row the harness inserts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSpec {
    /// Value for the table's owner column.
    pub owner: Option<Uuid>,
    /// Value for the table's tenant column.
    pub tenant: Option<Uuid>,
    /// Additional fixed `column = value` pairs.
    pub values: Vec<(String, String)>,
}

/// A fixture step, executed in order under the connection's own role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    CreateUser(Uuid),
    CreateTenant(Uuid),
    AddMembership {
        user: Uuid,
        tenant: Uuid,
        role: Option<String>,
    },
    RemoveMembership {
        user: Uuid,
        tenant: Uuid,
    },
    /// Insert a row into the scenario's table and remember its key.
    SeedRow(RowSpec),
    /// Create or update the user's profile row with `role`.
    SetProfileRole {
        user: Uuid,
        role: String,
    },
}

/// Which row the probe addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    /// The row created by the scenario's `SeedRow` step, by primary key.
    SeededRow,
    /// Rows matching `column = value`.
    RowWhere { column: String, value: String },
    /// A new row (INSERT probes).
    NewRow(RowSpec),
}

/// One isolation check against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    /// e.g. `"user_isolation.select"`.
    pub name: String,
    /// Schema-qualified table.
    pub table: String,
    pub operation: Operation,
    /// Identity the fixtures are created for, if any.
    pub setup_context: Option<SecurityContext>,
    pub probe_context: SecurityContext,
    pub expected: ExpectedOutcome,
    pub setup: Vec<Step>,
    pub target: ProbeTarget,
    /// `column = value` for UPDATE probes; `None` rewrites the key column to itself.
    pub assign: Option<(String, String)>,
}

/// Scenarios instantiated for a table plus the templates that were skipped.
#[derive(Debug, Default)]
pub struct Plan {
    pub scenarios: Vec<Scenario>,
    pub skipped: Vec<Diagnostic>,
}

impl Plan {
    fn skip(&mut self, table: &str, scenario: &str, reason: &str) {
        log::debug!("Skipping {scenario} on {table}: {reason}");
        self.skipped.push(skip_diagnostic(table, scenario, reason));
    }
}

/// DYN001 for a scenario that will not run.
#[must_use]
pub fn skip_diagnostic(table: &str, scenario: &str, reason: &str) -> Diagnostic {
    Diagnostic::new(
        "DYN001",
        Severity::Info,
        RuleCategory::Harness,
        format!("Skipped {scenario} on '{table}': {reason}."),
    )
    .on_table(table)
}

// ---------------------------------------------------------------------------
// Fixture helpers
// ---------------------------------------------------------------------------

/// Builds fixture steps for one table.
struct Fixtures<'a> {
    table: &'a TableInfo,
    config: &'a HarnessConfig,
    owner_column: Option<&'a str>,
    tenant_column: Option<&'a str>,
}

impl<'a> Fixtures<'a> {
    fn new(table: &'a TableInfo, config: &'a HarnessConfig) -> Self {
        Self {
            table,
            config,
            owner_column: table.first_column_of(&config.owner_columns),
            tenant_column: table.first_column_of(&config.tenant_columns),
        }
    }

    fn user(&self, steps: &mut Vec<Step>) -> Uuid {
        let id = Uuid::new_v4();
        if self.config.fixtures.users_table.is_some() {
            steps.push(Step::CreateUser(id));
        }
        id
    }

    /// A tenant, or `None` when the table has no tenant column.
    fn tenant(&self, steps: &mut Vec<Step>) -> Option<Uuid> {
        self.tenant_column?;
        Some(self.new_tenant(steps))
    }

    fn new_tenant(&self, steps: &mut Vec<Step>) -> Uuid {
        let id = Uuid::new_v4();
        if self.config.fixtures.tenants_table.is_some() {
            steps.push(Step::CreateTenant(id));
        }
        id
    }

    fn join(&self, steps: &mut Vec<Step>, user: Uuid, tenant: Option<Uuid>, role: Option<&str>) {
        let (Some(tenant), Some(_)) = (tenant, &self.config.fixtures.membership) else {
            return;
        };
        steps.push(Step::AddMembership {
            user,
            tenant,
            role: role.map(str::to_owned),
        });
    }

    fn row(&self, owner: Uuid, tenant: Option<Uuid>) -> RowSpec {
        RowSpec {
            owner: self.owner_column.map(|_| owner),
            tenant: self.tenant_column.and(tenant),
            values: Vec::new(),
        }
    }

    /// Identity of a signed-in user, carrying the tenant claim when there is one.
    fn signed_in(&self, user: Uuid, tenant: Option<Uuid>, label: &str) -> SecurityContext {
        match tenant {
            Some(t) => SecurityContext::tenant_member(user, t, label, self.config),
            None => SecurityContext::user(user, label, self.config),
        }
    }

    fn has_key(&self) -> bool {
        self.table.primary_key.is_some()
    }
}

#[allow(clippy::too_many_arguments)]
fn scenario(
    name: &str,
    table: &TableInfo,
    operation: Operation,
    setup_context: Option<SecurityContext>,
    probe_context: SecurityContext,
    expected: ExpectedOutcome,
    setup: Vec<Step>,
    target: ProbeTarget,
) -> Scenario {
    Scenario {
        name: name.to_owned(),
        table: table.qualified(),
        operation,
        setup_context,
        probe_context,
        expected,
        setup,
        target,
        assign: None,
    }
}

const NO_KEY: &str = "table has no single-column primary key to address the seeded row";

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Instantiate every applicable scenario for `table`.
#[must_use]
pub fn catalog(table: &TableInfo, config: &HarnessConfig) -> Plan {
    let fx = Fixtures::new(table, config);
    let mut plan = Plan::default();
    anonymous_denied(&fx, &mut plan);
    user_isolation(&fx, &mut plan);
    tenant_isolation(&fx, &mut plan);
    role_permission(&fx, &mut plan);
    plan
}

fn anonymous_denied(fx: &Fixtures<'_>, plan: &mut Plan) {
    let table = fx.table;
    let anon = SecurityContext::anonymous(fx.config);

    let mut steps = Vec::new();
    let owner = fx.user(&mut steps);
    let tenant = fx.tenant(&mut steps);
    fx.join(&mut steps, owner, tenant, None);
    let row = fx.row(owner, tenant);

    if fx.has_key() {
        let mut select_steps = steps.clone();
        select_steps.push(Step::SeedRow(row.clone()));
        plan.scenarios.push(scenario(
            "anonymous.select",
            table,
            Operation::Select,
            Some(fx.signed_in(owner, tenant, "owner")),
            anon.clone(),
            ExpectedOutcome::Denied,
            select_steps,
            ProbeTarget::SeededRow,
        ));
    } else {
        plan.skip(&table.qualified(), "anonymous.select", NO_KEY);
    }

    plan.scenarios.push(scenario(
        "anonymous.insert",
        table,
        Operation::Insert,
        None,
        anon,
        ExpectedOutcome::Denied,
        steps,
        ProbeTarget::NewRow(row),
    ));
}

fn user_isolation(fx: &Fixtures<'_>, plan: &mut Plan) {
    let table = fx.table;
    let qualified = table.qualified();
    if fx.owner_column.is_none() {
        plan.skip(&qualified, "user_isolation", "no owner column");
        return;
    }

    let mut steps = Vec::new();
    let a = fx.user(&mut steps);
    let b = fx.user(&mut steps);
    // Both users share one tenant so only ownership differs.
    let tenant = fx.tenant(&mut steps);
    fx.join(&mut steps, a, tenant, None);
    fx.join(&mut steps, b, tenant, None);
    let row = fx.row(a, tenant);
    let user_a = fx.signed_in(a, tenant, "user A");
    let user_b = fx.signed_in(b, tenant, "user B");

    let mut seeded = steps.clone();
    seeded.push(Step::SeedRow(row.clone()));

    if fx.has_key() {
        for (name, op) in [
            ("user_isolation.select", Operation::Select),
            ("user_isolation.update", Operation::Update),
            ("user_isolation.delete", Operation::Delete),
        ] {
            plan.scenarios.push(scenario(
                name,
                table,
                op,
                Some(user_a.clone()),
                user_b.clone(),
                ExpectedOutcome::Denied,
                seeded.clone(),
                ProbeTarget::SeededRow,
            ));
        }
        plan.scenarios.push(scenario(
            "user_isolation.control",
            table,
            Operation::Select,
            Some(user_a.clone()),
            user_a.clone(),
            ExpectedOutcome::RowCountEquals(1),
            seeded,
            ProbeTarget::SeededRow,
        ));
    } else {
        plan.skip(&qualified, "user_isolation.select/update/delete/control", NO_KEY);
    }

    // B inserting a row that claims A as owner.
    plan.scenarios.push(scenario(
        "user_isolation.insert",
        table,
        Operation::Insert,
        Some(user_a),
        user_b,
        ExpectedOutcome::Denied,
        steps,
        ProbeTarget::NewRow(row),
    ));
}

fn tenant_isolation(fx: &Fixtures<'_>, plan: &mut Plan) {
    let table = fx.table;
    let qualified = table.qualified();
    if fx.tenant_column.is_none() {
        plan.skip(&qualified, "tenant_isolation", "no tenant column");
        return;
    }

    let mut steps = Vec::new();
    let x = fx.new_tenant(&mut steps);
    let y = fx.new_tenant(&mut steps);
    let a = fx.user(&mut steps);
    let b = fx.user(&mut steps);
    fx.join(&mut steps, a, Some(x), None);
    fx.join(&mut steps, b, Some(y), None);
    let member_x = SecurityContext::tenant_member(a, x, "member of tenant X", fx.config);
    let member_y = SecurityContext::tenant_member(b, y, "member of tenant Y", fx.config);

    let mut seeded = steps.clone();
    seeded.push(Step::SeedRow(fx.row(a, Some(x))));

    if fx.has_key() {
        for (name, op) in [
            ("tenant_isolation.select", Operation::Select),
            ("tenant_isolation.update", Operation::Update),
            ("tenant_isolation.delete", Operation::Delete),
        ] {
            plan.scenarios.push(scenario(
                name,
                table,
                op,
                Some(member_x.clone()),
                member_y.clone(),
                ExpectedOutcome::Denied,
                seeded.clone(),
                ProbeTarget::SeededRow,
            ));
        }
        plan.scenarios.push(scenario(
            "tenant_isolation.control",
            table,
            Operation::Select,
            Some(member_x.clone()),
            member_x.clone(),
            ExpectedOutcome::RowCountEquals(1),
            seeded,
            ProbeTarget::SeededRow,
        ));
    } else {
        plan.skip(&qualified, "tenant_isolation.select/update/delete/control", NO_KEY);
    }

    // A member of Y inserting into X, as themselves.
    plan.scenarios.push(scenario(
        "tenant_isolation.insert",
        table,
        Operation::Insert,
        Some(member_x.clone()),
        member_y,
        ExpectedOutcome::Denied,
        steps,
        ProbeTarget::NewRow(fx.row(b, Some(x))),
    ));

    // Membership revocation: A leaves X and must lose sight of C's row in X.
    if fx.config.fixtures.membership.is_none() {
        plan.skip(&qualified, "tenant_isolation.revoked", "no membership table configured");
    } else if !fx.has_key() {
        plan.skip(&qualified, "tenant_isolation.revoked", NO_KEY);
    } else {
        let mut revoked = Vec::new();
        let x = fx.new_tenant(&mut revoked);
        let a = fx.user(&mut revoked);
        let c = fx.user(&mut revoked);
        fx.join(&mut revoked, a, Some(x), None);
        fx.join(&mut revoked, c, Some(x), None);
        revoked.push(Step::SeedRow(fx.row(c, Some(x))));
        revoked.push(Step::RemoveMembership { user: a, tenant: x });
        plan.scenarios.push(scenario(
            "tenant_isolation.revoked",
            table,
            Operation::Select,
            Some(SecurityContext::tenant_member(c, x, "member of tenant X", fx.config)),
            SecurityContext::tenant_member(a, x, "removed member of tenant X", fx.config),
            ExpectedOutcome::Denied,
            revoked,
            ProbeTarget::SeededRow,
        ));
    }
}

/// The role with the most capabilities; escalation attempts claim it.
fn strongest_role(config: &HarnessConfig) -> Option<&str> {
    config
        .roles
        .iter()
        .max_by_key(|(_, ops)| ops.len())
        .map(|(name, _)| name.as_str())
}

/// The role escalation probes start from: `viewer` when configured, else
/// the first role that may not insert.
fn weakest_role(config: &HarnessConfig) -> Option<&str> {
    if config.roles.contains_key("viewer") && !config.capabilities("viewer").contains(&Operation::Insert) {
        return Some("viewer");
    }
    config
        .roles
        .iter()
        .find(|(_, ops)| !ops.contains(&Operation::Insert))
        .map(|(name, _)| name.as_str())
}

fn role_permission(fx: &Fixtures<'_>, plan: &mut Plan) {
    let table = fx.table;
    let qualified = table.qualified();
    if fx.owner_column.is_none() && fx.tenant_column.is_none() {
        plan.skip(&qualified, "role", "no owner or tenant column");
        return;
    }
    if fx.config.roles.is_empty() {
        plan.skip(&qualified, "role", "no application roles configured");
        return;
    }

    for (role, caps) in &fx.config.roles {
        let mut steps = Vec::new();
        let user = fx.user(&mut steps);
        let tenant = fx.tenant(&mut steps);
        fx.join(&mut steps, user, tenant, Some(role.as_str()));
        if fx.config.fixtures.profile.is_some() {
            steps.push(Step::SetProfileRole {
                user,
                role: role.clone(),
            });
        }
        let row = fx.row(user, tenant);
        let mut context = SecurityContext::role_bound(user, role, fx.config);
        if let Some(t) = tenant {
            context = context.in_tenant(t);
        }

        for op in Operation::ALL {
            let name = format!("role.{role}.{}", op.to_string().to_lowercase());
            let expected = if caps.contains(&op) {
                ExpectedOutcome::Allowed
            } else {
                ExpectedOutcome::Denied
            };
            if op == Operation::Insert {
                plan.scenarios.push(scenario(
                    &name,
                    table,
                    op,
                    Some(context.clone()),
                    context.clone(),
                    expected,
                    steps.clone(),
                    ProbeTarget::NewRow(row.clone()),
                ));
            } else if fx.has_key() {
                let mut seeded = steps.clone();
                seeded.push(Step::SeedRow(row.clone()));
                plan.scenarios.push(scenario(
                    &name,
                    table,
                    op,
                    Some(context.clone()),
                    context.clone(),
                    expected,
                    seeded,
                    ProbeTarget::SeededRow,
                ));
            } else {
                plan.skip(&qualified, &name, NO_KEY);
            }
        }
    }

    // A weak role claiming a strong one in user-writable metadata.
    match (weakest_role(fx.config), strongest_role(fx.config)) {
        (Some(weak), Some(strong)) if weak != strong => {
            let mut steps = Vec::new();
            let user = fx.user(&mut steps);
            let tenant = fx.tenant(&mut steps);
            fx.join(&mut steps, user, tenant, Some(weak));
            if fx.config.fixtures.profile.is_some() {
                steps.push(Step::SetProfileRole {
                    user,
                    role: weak.to_owned(),
                });
            }
            let mut context = SecurityContext::role_bound(user, weak, fx.config);
            if let Some(t) = tenant {
                context = context.in_tenant(t);
            }
            plan.scenarios.push(scenario(
                "role.escalation.metadata",
                table,
                Operation::Insert,
                Some(context.clone()),
                context.claiming_user_metadata_role(strong),
                ExpectedOutcome::Denied,
                steps,
                ProbeTarget::NewRow(fx.row(user, tenant)),
            ));
        }
        _ => plan.skip(
            &qualified,
            "role.escalation.metadata",
            "no configured role lacks INSERT",
        ),
    }
}

/// A weak role updating its own profile row to the strongest role.
///
/// `profile` is the live profile table; `None` when it was not found.
#[must_use]
pub fn profile_escalation(profile: Option<&TableInfo>, config: &HarnessConfig) -> Plan {
    let mut plan = Plan::default();
    let Some(fixture) = &config.fixtures.profile else {
        return plan;
    };
    let Some(table) = profile else {
        plan.skip(&fixture.table, "role.escalation.profile", "profile table not found");
        return plan;
    };
    let (Some(weak), Some(strong)) = (weakest_role(config), strongest_role(config)) else {
        plan.skip(
            &table.qualified(),
            "role.escalation.profile",
            "no configured role lacks INSERT",
        );
        return plan;
    };

    let fx = Fixtures::new(table, config);
    let mut steps = Vec::new();
    let user = fx.user(&mut steps);
    steps.push(Step::SetProfileRole {
        user,
        role: weak.to_owned(),
    });
    let context = SecurityContext::role_bound(user, weak, config);
    let mut probe = scenario(
        "role.escalation.profile",
        table,
        Operation::Update,
        Some(context.clone()),
        context,
        ExpectedOutcome::Denied,
        steps,
        ProbeTarget::RowWhere {
            column: fixture.user_column.clone(),
            value: user.to_string(),
        },
    );
    probe.assign = Some((fixture.role_column.clone(), strong.to_owned()));
    plan.scenarios.push(probe);
    plan
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MembershipFixture, ProfileFixture};
    use crate::harness::executor::ColumnInfo;

    fn col(name: &str, data_type: &str, category: char) -> ColumnInfo {
        ColumnInfo {
            name: name.to_owned(),
            data_type: data_type.to_owned(),
            category,
            nullable: false,
            has_default: false,
            generated: false,
            enum_labels: Vec::new(),
        }
    }

    fn table(columns: &[(&str, &str, char)], primary_key: Option<&str>) -> TableInfo {
        TableInfo {
            schema: "public".to_owned(),
            name: "orders".to_owned(),
            rls_enabled: true,
            columns: columns.iter().map(|(n, t, c)| col(n, t, *c)).collect(),
            primary_key: primary_key.map(str::to_owned),
        }
    }

    fn names(plan: &Plan) -> Vec<&str> {
        plan.scenarios.iter().map(|s| s.name.as_str()).collect()
    }

    fn find<'a>(plan: &'a Plan, name: &str) -> &'a Scenario {
        plan.scenarios.iter().find(|s| s.name == name).unwrap()
    }

    #[test]
    fn test_owner_table_gets_user_isolation() {
        let t = table(&[("id", "uuid", 'U'), ("user_id", "uuid", 'U')], Some("id"));
        let plan = catalog(&t, &HarnessConfig::default());
        let names = names(&plan);
        for expected in [
            "anonymous.select",
            "anonymous.insert",
            "user_isolation.select",
            "user_isolation.update",
            "user_isolation.delete",
            "user_isolation.insert",
            "user_isolation.control",
            "role.admin.delete",
            "role.viewer.select",
            "role.escalation.metadata",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        assert!(!names.iter().any(|n| n.starts_with("tenant_isolation")));
        assert!(plan
            .skipped
            .iter()
            .any(|d| d.rule_id == "DYN001" && d.message.contains("tenant_isolation")));

        let control = find(&plan, "user_isolation.control");
        assert_eq!(control.expected, ExpectedOutcome::RowCountEquals(1));
        assert_eq!(control.probe_context.subject_id, control.setup_context.as_ref().unwrap().subject_id);

        let select = find(&plan, "user_isolation.select");
        assert_eq!(select.expected, ExpectedOutcome::Denied);
        assert_eq!(select.probe_context.label, "user B");
        let Some(Step::SeedRow(row)) = select.setup.last() else {
            panic!("seed step missing");
        };
        assert_eq!(row.owner, select.setup_context.as_ref().unwrap().subject_id);
        assert_ne!(row.owner, select.probe_context.subject_id);
    }

    #[test]
    fn test_insert_by_b_claims_a_as_owner() {
        let t = table(&[("id", "uuid", 'U'), ("owner_id", "uuid", 'U')], Some("id"));
        let plan = catalog(&t, &HarnessConfig::default());
        let insert = find(&plan, "user_isolation.insert");
        let ProbeTarget::NewRow(ref row) = insert.target else {
            panic!("insert probes a new row");
        };
        assert_eq!(row.owner, insert.setup_context.as_ref().unwrap().subject_id);
        assert_ne!(row.owner, insert.probe_context.subject_id);
    }

    #[test]
    fn test_role_matrix_expectations() {
        let t = table(&[("id", "uuid", 'U'), ("user_id", "uuid", 'U')], Some("id"));
        let plan = catalog(&t, &HarnessConfig::default());
        assert_eq!(find(&plan, "role.viewer.select").expected, ExpectedOutcome::Allowed);
        assert_eq!(find(&plan, "role.viewer.insert").expected, ExpectedOutcome::Denied);
        assert_eq!(find(&plan, "role.editor.update").expected, ExpectedOutcome::Allowed);
        assert_eq!(find(&plan, "role.editor.delete").expected, ExpectedOutcome::Denied);
        assert_eq!(find(&plan, "role.admin.delete").expected, ExpectedOutcome::Allowed);

        let escalation = find(&plan, "role.escalation.metadata");
        assert_eq!(escalation.operation, Operation::Insert);
        assert_eq!(escalation.probe_context.claims.app_role.as_deref(), Some("viewer"));
        assert_eq!(
            escalation.probe_context.claims.user_metadata_role.as_deref(),
            Some("admin")
        );
    }

    #[test]
    fn test_tenant_table_with_membership() {
        let mut config = HarnessConfig::default();
        config.fixtures.tenants_table = Some("public.organizations".to_owned());
        config.fixtures.membership = Some(MembershipFixture {
            table: "public.members".to_owned(),
            user_column: "user_id".to_owned(),
            tenant_column: "organization_id".to_owned(),
            role_column: Some("role".to_owned()),
        });
        let t = table(
            &[("id", "bigint", 'N'), ("organization_id", "uuid", 'U')],
            Some("id"),
        );
        let plan = catalog(&t, &config);
        let names = names(&plan);
        assert!(names.contains(&"tenant_isolation.revoked"));
        assert!(!names.iter().any(|n| n.starts_with("user_isolation")));

        let select = find(&plan, "tenant_isolation.select");
        let seeded_tenant = match select.setup.last() {
            Some(Step::SeedRow(row)) => row.tenant,
            other => panic!("unexpected last step {other:?}"),
        };
        assert_ne!(seeded_tenant, select.probe_context.claims.tenant_id);
        assert!(select.setup.iter().any(|s| matches!(s, Step::CreateTenant(_))));

        let revoked = find(&plan, "tenant_isolation.revoked");
        assert!(matches!(revoked.setup.last(), Some(Step::RemoveMembership { .. })));
        assert_eq!(revoked.expected, ExpectedOutcome::Denied);

        let viewer = find(&plan, "role.viewer.select");
        assert!(viewer.setup.iter().any(|s| matches!(
            s,
            Step::AddMembership { role: Some(r), .. } if r == "viewer"
        )));
    }

    #[test]
    fn test_revocation_skipped_without_membership() {
        let t = table(&[("id", "uuid", 'U'), ("tenant_id", "uuid", 'U')], Some("id"));
        let plan = catalog(&t, &HarnessConfig::default());
        assert!(!names(&plan).contains(&"tenant_isolation.revoked"));
        assert!(plan
            .skipped
            .iter()
            .any(|d| d.message.contains("tenant_isolation.revoked") && d.severity == Severity::Info));
        // No tenants table configured: ids are claims only.
        let select = find(&plan, "tenant_isolation.select");
        assert!(!select.setup.iter().any(|s| matches!(s, Step::CreateTenant(_))));
    }

    #[test]
    fn test_missing_primary_key_keeps_insert_probes() {
        let t = table(&[("user_id", "uuid", 'U'), ("note", "text", 'S')], None);
        let plan = catalog(&t, &HarnessConfig::default());
        let names = names(&plan);
        assert!(names.contains(&"anonymous.insert"));
        assert!(names.contains(&"user_isolation.insert"));
        assert!(!names.contains(&"user_isolation.select"));
        assert!(plan.skipped.iter().any(|d| d.message.contains("primary key")));
    }

    #[test]
    fn test_users_table_adds_create_user_steps() {
        let mut config = HarnessConfig::default();
        config.fixtures.users_table = Some("auth.users".to_owned());
        let t = table(&[("id", "uuid", 'U'), ("user_id", "uuid", 'U')], Some("id"));
        let plan = catalog(&t, &config);
        let select = find(&plan, "user_isolation.select");
        let created = select
            .setup
            .iter()
            .filter(|s| matches!(s, Step::CreateUser(_)))
            .count();
        assert_eq!(created, 2);
    }

    #[test]
    fn test_profile_escalation() {
        let mut config = HarnessConfig::default();
        assert!(profile_escalation(None, &config).scenarios.is_empty());

        config.fixtures.profile = Some(ProfileFixture {
            table: "public.profiles".to_owned(),
            user_column: "id".to_owned(),
            role_column: "role".to_owned(),
        });
        let missing = profile_escalation(None, &config);
        assert_eq!(missing.skipped.len(), 1);

        let mut profiles = table(&[("id", "uuid", 'U'), ("role", "text", 'S')], Some("id"));
        profiles.name = "profiles".to_owned();
        let plan = profile_escalation(Some(&profiles), &config);
        let probe = &plan.scenarios[0];
        assert_eq!(probe.operation, Operation::Update);
        assert_eq!(probe.assign, Some(("role".to_owned(), "admin".to_owned())));
        assert!(matches!(probe.target, ProbeTarget::RowWhere { ref column, .. } if column == "id"));
        assert_eq!(probe.table, "public.profiles");
    }

    #[test]
    fn test_scenarios_use_fresh_ids() {
        let t = table(&[("id", "uuid", 'U'), ("user_id", "uuid", 'U')], Some("id"));
        let first = catalog(&t, &HarnessConfig::default());
        let second = catalog(&t, &HarnessConfig::default());
        assert_ne!(
            find(&first, "user_isolation.select").probe_context.subject_id,
            find(&second, "user_isolation.select").probe_context.subject_id
        );
    }
}
