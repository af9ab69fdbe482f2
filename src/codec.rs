//! Policy document codec.
//!
//! Parses the line-oriented YAML-shaped document into a fully-linked
//! [`crate::policy_tree::EnvironmentPolicy`] plus a flat diagnostics
//! collection. On any `error`-severity diagnostic the codec returns no
//! policy at all — warnings never block. `to_document` is the inverse,
//! round-tripping a tree back into the same shape, omitting fields that
//! equal the format default.

use crate::acl::{permission, Acl, AclEntry, Effect};
use crate::constraint::{Constraint, VariableDecl, VariableType};
use crate::id::{is_valid_name, Principal, ResourceId, RoleId};
use crate::policy_tree::{ConstraintSet, EnvironmentPolicy, JitGroupPolicy, Privilege, PolicyMetadata, SystemPolicy};
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_yaml::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum DiagnosticCode {
    FILE_INVALID_SYNTAX,
    FILE_UNKNOWN_PROPERTY,
    FILE_INVALID_VERSION,
    ENVIRONMENT_MISSING,
    ENVIRONMENT_INVALID,
    SYSTEM_INVALID,
    GROUP_INVALID,
    ACL_INVALID_PRINCIPAL,
    ACL_INVALID_PERMISSION,
    CONSTRAINT_INVALID_TYPE,
    CONSTRAINT_INVALID_EXPIRY,
    CONSTRAINT_INVALID_EXPRESSION,
    CONSTRAINT_INVALID_VARIABLE_DECLARATION,
    PRIVILEGE_INVALID_RESOURCE_ID,
    PRIVILEGE_DUPLICATE_RESOURCE_ID,
    PRIVILEGE_INVALID_ROLE,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub scope: String,
    pub code: DiagnosticCode,
    pub message: String,
}

struct Sink {
    diagnostics: Vec<Diagnostic>,
    had_error: bool,
}

impl Sink {
    fn new() -> Self {
        Sink {
            diagnostics: Vec::new(),
            had_error: false,
        }
    }

    fn error(&mut self, scope: impl Into<String>, code: DiagnosticCode, message: impl Into<String>) {
        self.had_error = true;
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            scope: scope.into(),
            code,
            message: message.into(),
        });
    }

}

/// Parse a policy document, returning the linked tree (on success) and the
/// full diagnostics collection (present regardless of outcome).
pub fn parse_document(text: &str, source: &str) -> (Option<EnvironmentPolicy>, Vec<Diagnostic>) {
    let mut sink = Sink::new();
    let root: Value = match serde_yaml::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            sink.error("document", DiagnosticCode::FILE_INVALID_SYNTAX, e.to_string());
            return (None, sink.diagnostics);
        }
    };
    let Some(mapping) = root.as_mapping() else {
        sink.error("document", DiagnosticCode::FILE_INVALID_SYNTAX, "root is not a mapping");
        return (None, sink.diagnostics);
    };

    match mapping.get(Value::from("schemaVersion")) {
        Some(Value::Number(n)) if n.as_i64() == Some(1) => {}
        Some(other) => sink.error(
            "document",
            DiagnosticCode::FILE_INVALID_VERSION,
            format!("unsupported schemaVersion `{other:?}`"),
        ),
        None => sink.error("document", DiagnosticCode::FILE_INVALID_VERSION, "missing schemaVersion"),
    }

    for (key, _) in mapping {
        if let Some(key) = key.as_str() {
            if !matches!(key, "schemaVersion" | "environment") {
                sink.error("document", DiagnosticCode::FILE_UNKNOWN_PROPERTY, format!("unknown property `{key}`"));
            }
        }
    }

    let Some(env_value) = mapping.get(Value::from("environment")) else {
        sink.error("document", DiagnosticCode::ENVIRONMENT_MISSING, "missing `environment`");
        return (None, sink.diagnostics);
    };

    let env = parse_environment(env_value, source, &mut sink);
    if sink.had_error {
        (None, sink.diagnostics)
    } else {
        (env, sink.diagnostics)
    }
}

fn get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.as_mapping()?.get(Value::from(key))
}

fn get_str(value: &Value, key: &str) -> Option<String> {
    get(value, key).and_then(Value::as_str).map(str::to_string)
}

fn parse_environment(value: &Value, source: &str, sink: &mut Sink) -> Option<EnvironmentPolicy> {
    let metadata_value = get(value, "metadata");
    let default_name = metadata_value.and_then(|m| get_str(m, "defaultName"));
    let version = metadata_value.and_then(|m| get_str(m, "version"));

    let name = get_str(value, "name")
        .filter(|n| !n.trim().is_empty())
        .or_else(|| default_name.clone())
        .map(|n| n.to_ascii_lowercase());
    let Some(name) = name else {
        sink.error("environment", DiagnosticCode::ENVIRONMENT_INVALID, "missing `name` and no `metadata.defaultName` fallback");
        return None;
    };
    if !is_valid_name(&name) {
        sink.error("environment", DiagnosticCode::ENVIRONMENT_INVALID, format!("invalid name `{name}`"));
        return None;
    }
    let description = get_str(value, "description").unwrap_or_default();

    let metadata = PolicyMetadata {
        source: source.to_string(),
        last_modified: Utc::now(),
        version,
        default_name,
    };

    let mut env = match EnvironmentPolicy::new(&name, description, metadata) {
        Ok(e) => e,
        Err(e) => {
            sink.error("environment", DiagnosticCode::ENVIRONMENT_INVALID, e.to_string());
            return None;
        }
    };

    env.acl = match get(value, "access") {
        Some(access) => parse_acl(access, &format!("environment/{name}"), sink),
        // Missing access on the environment root defaults to allAuthenticated:View.
        None => Acl::builder().allow(Principal::Class(crate::id::ClassId::all_authenticated()), permission::VIEW).build(),
    };
    env.constraints = get(value, "constraints")
        .map(|c| parse_constraint_set(c, &format!("environment/{name}"), sink))
        .unwrap_or_default();

    if let Some(systems) = get(value, "systems").and_then(Value::as_sequence) {
        for sys_value in systems {
            if let Some(sys) = parse_system(sys_value, &name, sink) {
                if let Err(e) = env.add_system(sys) {
                    sink.error(format!("environment/{name}"), DiagnosticCode::SYSTEM_INVALID, e.to_string());
                }
            }
        }
    }

    Some(env)
}

fn parse_system(value: &Value, env_name: &str, sink: &mut Sink) -> Option<SystemPolicy> {
    let scope_prefix = format!("environment/{env_name}");
    let name = get_str(value, "name").map(|n| n.to_ascii_lowercase());
    let Some(name) = name.filter(|n| !n.is_empty()) else {
        sink.error(&scope_prefix, DiagnosticCode::SYSTEM_INVALID, "missing system `name`");
        return None;
    };
    let description = get_str(value, "description").unwrap_or_default();
    let mut sys = match SystemPolicy::new(&name, description) {
        Ok(s) => s,
        Err(e) => {
            sink.error(&scope_prefix, DiagnosticCode::SYSTEM_INVALID, e.to_string());
            return None;
        }
    };
    let scope = format!("{scope_prefix}/system/{name}");

    // Missing access on a system/group means no ACL of its own (inherits only).
    sys.acl = get(value, "access")
        .map(|a| parse_acl(a, &scope, sink))
        .unwrap_or_default();
    sys.constraints = get(value, "constraints")
        .map(|c| parse_constraint_set(c, &scope, sink))
        .unwrap_or_default();

    if let Some(groups) = get(value, "groups").and_then(Value::as_sequence) {
        for grp_value in groups {
            if let Some(grp) = parse_group(grp_value, &scope, sink) {
                if let Err(e) = sys.add_group(grp) {
                    sink.error(&scope, DiagnosticCode::GROUP_INVALID, e.to_string());
                }
            }
        }
    }

    Some(sys)
}

fn parse_group(value: &Value, scope_prefix: &str, sink: &mut Sink) -> Option<JitGroupPolicy> {
    let name = get_str(value, "name").map(|n| n.to_ascii_lowercase());
    let Some(name) = name.filter(|n| !n.is_empty()) else {
        sink.error(scope_prefix, DiagnosticCode::GROUP_INVALID, "missing group `name`");
        return None;
    };
    let description = get_str(value, "description").unwrap_or_default();
    let mut grp = match JitGroupPolicy::new(&name, description) {
        Ok(g) => g,
        Err(e) => {
            sink.error(scope_prefix, DiagnosticCode::GROUP_INVALID, e.to_string());
            return None;
        }
    };
    let scope = format!("{scope_prefix}/group/{name}");

    grp.acl = get(value, "access")
        .map(|a| parse_acl(a, &scope, sink))
        .unwrap_or_default();
    grp.constraints = get(value, "constraints")
        .map(|c| parse_constraint_set(c, &scope, sink))
        .unwrap_or_default();

    if let Some(privileges) = get(value, "privileges").and_then(|p| get(p, "iamRoleBindings")).and_then(Value::as_sequence) {
        let mut seen_resources = std::collections::HashSet::new();
        for priv_value in privileges {
            if let Some(p) = parse_privilege(priv_value, &scope, sink) {
                if !seen_resources.insert(p.resource.as_str().to_string()) {
                    sink.error(&scope, DiagnosticCode::PRIVILEGE_DUPLICATE_RESOURCE_ID, format!("duplicate resource `{}`", p.resource));
                    continue;
                }
                grp.privileges.push(p);
            }
        }
    }

    Some(grp)
}

fn parse_acl(value: &Value, scope: &str, sink: &mut Sink) -> Acl {
    let mut builder = Acl::builder();
    let Some(entries) = value.as_sequence() else {
        return builder.build();
    };
    for entry in entries {
        let Some(principal_str) = get_str(entry, "principal") else {
            sink.error(scope, DiagnosticCode::ACL_INVALID_PRINCIPAL, "missing `principal`");
            continue;
        };
        let Some(principal) = Principal::parse(&principal_str) else {
            sink.error(scope, DiagnosticCode::ACL_INVALID_PRINCIPAL, format!("invalid principal `{principal_str}`"));
            continue;
        };
        let allow = get_str(entry, "allow");
        let deny = get_str(entry, "deny");
        match (allow, deny) {
            (Some(_), Some(_)) => {
                sink.error(scope, DiagnosticCode::ACL_INVALID_PERMISSION, "`allow` and `deny` are mutually exclusive");
            }
            (Some(list), None) => match permission::parse_mask(&list) {
                Ok(mask) => builder = builder.allow(principal, mask),
                Err(e) => sink.error(scope, DiagnosticCode::ACL_INVALID_PERMISSION, e),
            },
            (None, Some(list)) => match permission::parse_mask(&list) {
                Ok(mask) => builder = builder.deny(principal, mask),
                Err(e) => sink.error(scope, DiagnosticCode::ACL_INVALID_PERMISSION, e),
            },
            (None, None) => {
                sink.error(scope, DiagnosticCode::ACL_INVALID_PERMISSION, "entry carries neither `allow` nor `deny`");
            }
        }
    }
    builder.build()
}

fn parse_constraint_set(value: &Value, scope: &str, sink: &mut Sink) -> ConstraintSet {
    let join = get(value, "join")
        .and_then(Value::as_sequence)
        .map(|seq| seq.iter().filter_map(|c| parse_constraint(c, scope, sink)).collect())
        .unwrap_or_default();
    let approve = get(value, "approve")
        .and_then(Value::as_sequence)
        .map(|seq| seq.iter().filter_map(|c| parse_constraint(c, scope, sink)).collect())
        .unwrap_or_default();

    let join_expiries = join.iter().filter(|c| c.is_expiry()).count();
    if join_expiries > 1 {
        sink.error(scope, DiagnosticCode::CONSTRAINT_INVALID_TYPE, "at most one Expiry constraint is allowed in `join`");
    }
    if approve.iter().any(Constraint::is_expiry) {
        sink.error(scope, DiagnosticCode::CONSTRAINT_INVALID_TYPE, "Expiry constraints are not allowed in `approve`");
    }

    ConstraintSet { join, approve }
}

fn parse_constraint(value: &Value, scope: &str, sink: &mut Sink) -> Option<Constraint> {
    let kind = get_str(value, "type").map(|s| s.to_ascii_lowercase());
    match kind.as_deref() {
        Some("expiry") => {
            let display_name = get_str(value, "displayName").unwrap_or_default();
            let min_raw = get_str(value, "expiryMinDuration");
            let max_raw = get_str(value, "expiryMaxDuration");
            let (Some(min_raw), Some(max_raw)) = (min_raw, max_raw) else {
                sink.error(scope, DiagnosticCode::CONSTRAINT_INVALID_EXPIRY, "expiry constraint requires `expiryMinDuration` and `expiryMaxDuration`");
                return None;
            };
            let (Some(min_dur), Some(max_dur)) = (parse_iso8601_duration(min_raw.trim()), parse_iso8601_duration(max_raw.trim())) else {
                sink.error(scope, DiagnosticCode::CONSTRAINT_INVALID_EXPIRY, "malformed ISO 8601 duration");
                return None;
            };
            if min_dur > max_dur {
                sink.error(scope, DiagnosticCode::CONSTRAINT_INVALID_EXPIRY, "`expiryMinDuration` must be <= `expiryMaxDuration`");
                return None;
            }
            Some(Constraint::Expiry { display_name, min_dur, max_dur })
        }
        Some("expression") => {
            let Some(name) = get_str(value, "name").map(|n| n.to_ascii_lowercase()) else {
                sink.error(scope, DiagnosticCode::CONSTRAINT_INVALID_EXPRESSION, "expression constraint requires `name`");
                return None;
            };
            let display_name = get_str(value, "displayName").unwrap_or_default();
            let Some(expression) = get_str(value, "expression") else {
                sink.error(scope, DiagnosticCode::CONSTRAINT_INVALID_EXPRESSION, "missing `expression`");
                return None;
            };
            if crate::constraint::expr::compile(&expression).is_err() {
                sink.error(scope, DiagnosticCode::CONSTRAINT_INVALID_EXPRESSION, format!("`{expression}` does not compile"));
                return None;
            }
            let variables = get(value, "variables")
                .and_then(Value::as_sequence)
                .map(|seq| seq.iter().filter_map(|v| parse_variable(v, scope, sink)).collect())
                .unwrap_or_default();
            Some(Constraint::Expression { name, display_name, variables, expression })
        }
        _ => {
            sink.error(scope, DiagnosticCode::CONSTRAINT_INVALID_TYPE, format!("unknown constraint type `{kind:?}`"));
            None
        }
    }
}

fn parse_variable(value: &Value, scope: &str, sink: &mut Sink) -> Option<VariableDecl> {
    let kind = get_str(value, "type").map(|s| s.to_ascii_lowercase());
    let Some(name) = get_str(value, "name") else {
        sink.error(scope, DiagnosticCode::CONSTRAINT_INVALID_VARIABLE_DECLARATION, "variable missing `name`");
        return None;
    };
    let display_name = get_str(value, "displayName").unwrap_or_else(|| name.clone());
    let min = get(value, "min").and_then(Value::as_i64);
    let max = get(value, "max").and_then(Value::as_i64);
    let var_type = match kind.as_deref() {
        Some("string") => VariableType::Str {
            min_len: min.unwrap_or(0).max(0) as u32,
            max_len: max.unwrap_or(i64::from(u32::MAX)).max(0) as u32,
        },
        Some("int") | Some("integer") => VariableType::Int {
            min: min.unwrap_or(i64::MIN),
            max: max.unwrap_or(i64::MAX),
        },
        Some("bool") | Some("boolean") => VariableType::Bool,
        _ => {
            sink.error(scope, DiagnosticCode::CONSTRAINT_INVALID_VARIABLE_DECLARATION, format!("unknown variable type `{kind:?}`"));
            return None;
        }
    };
    Some(VariableDecl { name, display_name, var_type })
}

fn parse_privilege(value: &Value, scope: &str, sink: &mut Sink) -> Option<Privilege> {
    let project = get_str(value, "project");
    let resource_field = get_str(value, "resource");
    let resource = match (project, resource_field) {
        (Some(_), Some(_)) => {
            sink.error(scope, DiagnosticCode::PRIVILEGE_INVALID_RESOURCE_ID, "`project` and `resource` are mutually exclusive");
            return None;
        }
        (Some(short), None) => ResourceId::from_project(short),
        (None, Some(qualified)) => match ResourceId::parse_qualified(&qualified) {
            Some(r) => r,
            None => {
                sink.error(scope, DiagnosticCode::PRIVILEGE_INVALID_RESOURCE_ID, format!("invalid resource id `{qualified}`"));
                return None;
            }
        },
        (None, None) => {
            sink.error(scope, DiagnosticCode::PRIVILEGE_INVALID_RESOURCE_ID, "missing `project` or `resource`");
            return None;
        }
    };
    let Some(role_str) = get_str(value, "role") else {
        sink.error(scope, DiagnosticCode::PRIVILEGE_INVALID_ROLE, "missing `role`");
        return None;
    };
    let Some(role) = RoleId::parse(&role_str) else {
        sink.error(scope, DiagnosticCode::PRIVILEGE_INVALID_ROLE, format!("invalid role `{role_str}`"));
        return None;
    };
    let description = get_str(value, "description");
    let condition = get_str(value, "condition");
    Some(Privilege { resource, role, description, condition })
}

/// A tiny ISO 8601 duration parser covering the `PnDTnHnMnS` subset (no
/// calendar-relative Y/M components, since a fixed-length `Duration` can't
/// represent those unambiguously).
fn parse_iso8601_duration(s: &str) -> Option<Duration> {
    let rest = s.strip_prefix('P')?;
    if rest.contains('Y') || (rest.contains('M') && !rest.contains('T')) {
        return None; // calendar months/years not supported
    }
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };

    let mut total = Duration::zero();
    total = total + parse_unit(date_part, 'D').map(Duration::days).unwrap_or_else(Duration::zero);
    if let Some(time_part) = time_part {
        total = total + parse_unit(time_part, 'H').map(Duration::hours).unwrap_or_else(Duration::zero);
        total = total + parse_unit(time_part, 'M').map(Duration::minutes).unwrap_or_else(Duration::zero);
        total = total + parse_unit(time_part, 'S').map(Duration::seconds).unwrap_or_else(Duration::zero);
    }
    if total.is_zero() && s != "PT0S" {
        return None;
    }
    Some(total)
}

fn parse_unit(segment: &str, unit: char) -> Option<i64> {
    let idx = segment.find(unit)?;
    let start = segment[..idx]
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    segment[start..idx].parse().ok()
}

// ─── Emission ─────────────────────────────────────────────────────────────

fn format_iso8601_duration(d: &Duration) -> String {
    let total_seconds = d.num_seconds();
    if total_seconds == 0 {
        return "PT0S".to_string();
    }
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let mut out = String::from("PT");
    if hours > 0 {
        out.push_str(&format!("{hours}H"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}M"));
    }
    if seconds > 0 || (hours == 0 && minutes == 0) {
        out.push_str(&format!("{seconds}S"));
    }
    out
}

#[derive(Serialize)]
struct AccessEntryDoc {
    principal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    allow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deny: Option<String>,
}

fn acl_to_doc(acl: &Acl) -> Vec<AccessEntryDoc> {
    acl.entries()
        .iter()
        .map(|e: &AclEntry| AccessEntryDoc {
            principal: e.principal.to_string(),
            allow: matches!(e.effect, Effect::Allow).then(|| permission::format_mask(e.mask)),
            deny: matches!(e.effect, Effect::Deny).then(|| permission::format_mask(e.mask)),
        })
        .collect()
}

fn constraint_to_doc(c: &Constraint) -> serde_yaml::Value {
    let mut map = serde_yaml::Mapping::new();
    match c {
        Constraint::Expiry { display_name, min_dur, max_dur } => {
            map.insert("type".into(), "expiry".into());
            map.insert("displayName".into(), display_name.clone().into());
            map.insert("expiryMinDuration".into(), format_iso8601_duration(min_dur).into());
            map.insert("expiryMaxDuration".into(), format_iso8601_duration(max_dur).into());
        }
        Constraint::Expression { name, display_name, variables, expression } => {
            map.insert("type".into(), "expression".into());
            map.insert("name".into(), name.clone().into());
            map.insert("displayName".into(), display_name.clone().into());
            map.insert("expression".into(), expression.clone().into());
            if !variables.is_empty() {
                let vars: Vec<serde_yaml::Value> = variables.iter().map(variable_to_doc).collect();
                map.insert("variables".into(), serde_yaml::Value::Sequence(vars));
            }
        }
    }
    serde_yaml::Value::Mapping(map)
}

fn variable_to_doc(v: &VariableDecl) -> serde_yaml::Value {
    let mut map = serde_yaml::Mapping::new();
    map.insert("name".into(), v.name.clone().into());
    map.insert("displayName".into(), v.display_name.clone().into());
    match v.var_type {
        VariableType::Str { min_len, max_len } => {
            map.insert("type".into(), "string".into());
            map.insert("min".into(), (min_len as i64).into());
            map.insert("max".into(), (max_len as i64).into());
        }
        VariableType::Int { min, max } => {
            map.insert("type".into(), "int".into());
            map.insert("min".into(), min.into());
            map.insert("max".into(), max.into());
        }
        VariableType::Bool => {
            map.insert("type".into(), "bool".into());
        }
    }
    serde_yaml::Value::Mapping(map)
}

/// Round-trip a linked tree back into the document shape. Fields equal to
/// the format default (empty ACL, empty constraint set, empty description)
/// are omitted, matching `toDocument`'s contract.
pub fn to_document(env: &EnvironmentPolicy) -> serde_yaml::Value {
    let mut root = serde_yaml::Mapping::new();
    root.insert("schemaVersion".into(), 1.into());
    root.insert("environment".into(), environment_to_doc(env));
    serde_yaml::Value::Mapping(root)
}

fn environment_to_doc(env: &EnvironmentPolicy) -> serde_yaml::Value {
    let mut map = serde_yaml::Mapping::new();
    map.insert("name".into(), env.name.clone().into());
    if !env.description.is_empty() {
        map.insert("description".into(), env.description.clone().into());
    }
    if !env.acl.is_empty() {
        let entries = acl_to_doc(&env.acl);
        map.insert("access".into(), serde_yaml::to_value(entries).unwrap());
    }
    insert_constraints(&mut map, &env.constraints);
    let systems: Vec<_> = env.systems().map(system_to_doc).collect();
    if !systems.is_empty() {
        map.insert("systems".into(), serde_yaml::Value::Sequence(systems));
    }
    serde_yaml::Value::Mapping(map)
}

fn system_to_doc(sys: &SystemPolicy) -> serde_yaml::Value {
    let mut map = serde_yaml::Mapping::new();
    map.insert("name".into(), sys.name.clone().into());
    if !sys.description.is_empty() {
        map.insert("description".into(), sys.description.clone().into());
    }
    if !sys.acl.is_empty() {
        let entries = acl_to_doc(&sys.acl);
        map.insert("access".into(), serde_yaml::to_value(entries).unwrap());
    }
    insert_constraints(&mut map, &sys.constraints);
    let groups: Vec<_> = sys.groups().map(group_to_doc).collect();
    if !groups.is_empty() {
        map.insert("groups".into(), serde_yaml::Value::Sequence(groups));
    }
    serde_yaml::Value::Mapping(map)
}

fn group_to_doc(grp: &JitGroupPolicy) -> serde_yaml::Value {
    let mut map = serde_yaml::Mapping::new();
    map.insert("name".into(), grp.name.clone().into());
    if !grp.description.is_empty() {
        map.insert("description".into(), grp.description.clone().into());
    }
    if !grp.acl.is_empty() {
        let entries = acl_to_doc(&grp.acl);
        map.insert("access".into(), serde_yaml::to_value(entries).unwrap());
    }
    insert_constraints(&mut map, &grp.constraints);
    if !grp.privileges.is_empty() {
        let bindings: Vec<_> = grp
            .privileges
            .iter()
            .map(|p| {
                let mut m = serde_yaml::Mapping::new();
                m.insert("resource".into(), p.resource.to_string().into());
                m.insert("role".into(), p.role.to_string().into());
                if let Some(d) = &p.description {
                    m.insert("description".into(), d.clone().into());
                }
                if let Some(c) = &p.condition {
                    m.insert("condition".into(), c.clone().into());
                }
                serde_yaml::Value::Mapping(m)
            })
            .collect();
        let mut privileges = serde_yaml::Mapping::new();
        privileges.insert("iamRoleBindings".into(), serde_yaml::Value::Sequence(bindings));
        map.insert("privileges".into(), serde_yaml::Value::Mapping(privileges));
    }
    serde_yaml::Value::Mapping(map)
}

fn insert_constraints(map: &mut serde_yaml::Mapping, constraints: &ConstraintSet) {
    if constraints.join.is_empty() && constraints.approve.is_empty() {
        return;
    }
    let mut c = serde_yaml::Mapping::new();
    if !constraints.join.is_empty() {
        c.insert("join".into(), serde_yaml::Value::Sequence(constraints.join.iter().map(constraint_to_doc).collect()));
    }
    if !constraints.approve.is_empty() {
        c.insert("approve".into(), serde_yaml::Value::Sequence(constraints.approve.iter().map(constraint_to_doc).collect()));
    }
    map.insert("constraints".into(), serde_yaml::Value::Mapping(c));
}
