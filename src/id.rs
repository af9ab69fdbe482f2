//! Identifiers & Principals.
//!
//! Every identifier kind round-trips through `parse`/`Display`. Parsing never
//! panics or raises: malformed input yields `None`. Construction from
//! pre-validated parts (`JitGroupId::new`) asserts the name regex instead,
//! since those call sites own the invariant already.

use std::fmt;
use std::sync::OnceLock;

/// `^[a-z0-9][a-z0-9-]{0,23}$` — shared by environment, system and group names.
pub const MAX_NAME_LEN: usize = 24;

fn name_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9][a-z0-9-]{0,23}$").unwrap())
}

/// Validate a policy-node name (already lowercased by the caller).
pub fn is_valid_name(name: &str) -> bool {
    name.len() <= MAX_NAME_LEN && name_regex().is_match(name)
}

fn canonicalize(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

/// An end-user identity (e.g. `alice@example.com`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        UserId(canonicalize(raw.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

/// A directory (external) group identity (e.g. `approvers@example.com`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        GroupId(canonicalize(raw.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group:{}", self.0)
    }
}

/// An internal JIT group: `(environment, system, name)`.
///
/// String form is `jit-group:<env>.<system>.<name>`, case-insensitive on
/// parse, always emitted lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JitGroupId {
    pub environment: String,
    pub system: String,
    pub name: String,
}

impl JitGroupId {
    /// Construct from already-validated, lowercase parts. Asserts the name
    /// regex holds for each segment.
    pub fn new(environment: impl Into<String>, system: impl Into<String>, name: impl Into<String>) -> Self {
        let environment = environment.into();
        let system = system.into();
        let name = name.into();
        assert!(is_valid_name(&environment), "invalid environment name: {environment}");
        assert!(is_valid_name(&system), "invalid system name: {system}");
        assert!(is_valid_name(&name), "invalid group name: {name}");
        JitGroupId {
            environment,
            system,
            name,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix("jit-group:")?;
        let lower = rest.to_ascii_lowercase();
        let mut parts = lower.splitn(3, '.');
        let environment = parts.next()?.to_string();
        let system = parts.next()?.to_string();
        let name = parts.next()?.to_string();
        if !is_valid_name(&environment) || !is_valid_name(&system) || !is_valid_name(&name) {
            return None;
        }
        Some(JitGroupId {
            environment,
            system,
            name,
        })
    }

    /// Parse the directory-group naming scheme `jit.<env>.<system>.<name>@<domain>`
    /// used by the subject resolver to recover a JIT-group triple
    /// from a plain directory group email.
    pub fn parse_directory_local_part(local: &str) -> Option<Self> {
        let rest = local.strip_prefix("jit.")?;
        let lower = rest.to_ascii_lowercase();
        let mut parts = lower.splitn(3, '.');
        let environment = parts.next()?.to_string();
        let system = parts.next()?.to_string();
        let name = parts.next()?.to_string();
        if !is_valid_name(&environment) || !is_valid_name(&system) || !is_valid_name(&name) {
            return None;
        }
        Some(JitGroupId {
            environment,
            system,
            name,
        })
    }
}

impl fmt::Display for JitGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "jit-group:{}.{}.{}", self.environment, self.system, self.name)
    }
}

/// A well-known class of principal, e.g. "all authenticated users".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(String);

impl ClassId {
    pub const ALL_AUTHENTICATED: &'static str = "allauthenticated";

    pub fn new(raw: impl AsRef<str>) -> Self {
        ClassId(canonicalize(raw.as_ref()))
    }

    pub fn all_authenticated() -> Self {
        ClassId(Self::ALL_AUTHENTICATED.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class:{}", self.0)
    }
}

/// A resource identifier (`projects/<id>`, `folders/<id>`, `organizations/<id>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(String);

impl ResourceId {
    /// Build from a short project id (`project-1` -> `projects/project-1`).
    pub fn from_project(short: impl AsRef<str>) -> Self {
        ResourceId(format!("projects/{}", short.as_ref()))
    }

    /// Build from an already-qualified path (`projects/<id>`, `folders/<id>`, `organizations/<id>`).
    pub fn parse_qualified(s: &str) -> Option<Self> {
        let kind = s.split('/').next()?;
        if matches!(kind, "projects" | "folders" | "organizations") && s.matches('/').count() == 1
        {
            Some(ResourceId(s.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An IAM role id (`roles/<name>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleId(String);

impl RoleId {
    pub fn parse(s: &str) -> Option<Self> {
        s.strip_prefix("roles/").map(|_| RoleId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tagged identifier that may appear in an ACL entry or a subject's
/// principal set.
///
/// Ordering is the lexicographic order of the canonical string,
/// not the enum's declaration order, so it's implemented by hand below.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    User(UserId),
    Group(GroupId),
    JitGroup(JitGroupId),
    Class(ClassId),
}

impl Principal {
    /// Parse any of the four principal string forms. Returns `None` on
    /// malformed input — this never raises.
    pub fn parse(s: &str) -> Option<Self> {
        if let Some(rest) = s.strip_prefix("user:") {
            return Some(Principal::User(UserId::new(rest)));
        }
        if let Some(rest) = s.strip_prefix("group:") {
            return Some(Principal::Group(GroupId::new(rest)));
        }
        if let Some(rest) = s.strip_prefix("class:") {
            return Some(Principal::Class(ClassId::new(rest)));
        }
        if s.starts_with("jit-group:") {
            return JitGroupId::parse(s).map(Principal::JitGroup);
        }
        None
    }

    /// Canonical string form, lowercase, with tag prefix.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl PartialOrd for Principal {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Principal {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical().cmp(&other.canonical())
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::User(u) => write!(f, "{u}"),
            Principal::Group(g) => write!(f, "{g}"),
            Principal::JitGroup(j) => write!(f, "{j}"),
            Principal::Class(c) => write!(f, "{c}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_regex_boundaries() {
        assert!(is_valid_name("a"));
        assert!(is_valid_name("a-b"));
        assert!(is_valid_name("012345678901234567890123")); // 24 chars
        assert!(!is_valid_name("A"));
        assert!(!is_valid_name("-a"));
        assert!(!is_valid_name("a_b"));
        assert!(!is_valid_name("0123456789012345678901234")); // 25 chars
        assert!(!is_valid_name("a b"));
    }

    #[test]
    fn user_id_canonicalizes() {
        let a = UserId::new("Alice@Example.COM");
        let b = UserId::new("alice@example.com");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "user:alice@example.com");
    }

    #[test]
    fn jit_group_round_trip() {
        let j = JitGroupId::new("env-1", "sys-1", "g-1");
        let s = j.to_string();
        assert_eq!(s, "jit-group:env-1.sys-1.g-1");
        let parsed = JitGroupId::parse(&s.to_ascii_uppercase()).unwrap();
        assert_eq!(parsed, j);
    }

    #[test]
    fn jit_group_parse_rejects_malformed() {
        assert!(JitGroupId::parse("jit-group:env.sys").is_none());
        assert!(JitGroupId::parse("not-a-jit-group:a.b.c").is_none());
        assert!(JitGroupId::parse("jit-group:A_B.sys.name").is_none());
    }

    #[test]
    fn directory_local_part_recovers_jit_group() {
        let j = JitGroupId::parse_directory_local_part("jit.env-1.sys-1.g-admin").unwrap();
        assert_eq!(j, JitGroupId::new("env-1", "sys-1", "g-admin"));
        assert!(JitGroupId::parse_directory_local_part("approvers").is_none());
    }

    #[test]
    fn principal_parse_round_trip() {
        for s in [
            "user:alice@example.com",
            "group:approvers@example.com",
            "jit-group:env-1.sys-1.g-1",
            "class:allauthenticated",
        ] {
            let p = Principal::parse(s).unwrap();
            assert_eq!(p.to_string(), s);
        }
        assert!(Principal::parse("bogus:foo").is_none());
    }

    #[test]
    fn resource_id_accepts_short_and_qualified() {
        assert_eq!(ResourceId::from_project("project-1").as_str(), "projects/project-1");
        assert_eq!(
            ResourceId::parse_qualified("folders/f-1").unwrap().as_str(),
            "folders/f-1"
        );
        assert!(ResourceId::parse_qualified("widgets/w-1").is_none());
    }

    #[test]
    fn ordering_is_lexicographic_on_canonical_string() {
        let a = Principal::User(UserId::new("alice@example.com"));
        let b = Principal::User(UserId::new("bob@example.com"));
        assert!(a < b);
    }
}
