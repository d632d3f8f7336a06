//! Declarative resource descriptions: kinds, identifiers, attributes, guards.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of host object a resource manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A system package.
    Package,
    /// A local user account.
    User,
    /// A regular file (or link, or absent path).
    File,
    /// A directory.
    Directory,
    /// A shell command.
    Exec,
    /// A crontab entry.
    Cron,
    /// A file assembled from ordered fragments.
    Concat,
    /// One ordered snippet of a concat file.
    Fragment,
}

impl ResourceKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Package,
        Self::User,
        Self::File,
        Self::Directory,
        Self::Exec,
        Self::Cron,
        Self::Concat,
        Self::Fragment,
    ];

    /// Capitalised label used in resource identifiers (`Package[...]`).
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Package => "Package",
            Self::User => "User",
            Self::File => "File",
            Self::Directory => "Directory",
            Self::Exec => "Exec",
            Self::Cron => "Cron",
            Self::Concat => "Concat",
            Self::Fragment => "Fragment",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown resource kind '{s}'"))
    }
}

/// Unique identifier of a resource within a run: `Kind[name]`.
///
/// # Examples
///
/// ```
/// use gitolite_converge::engine::spec::{ResourceId, ResourceKind};
///
/// let id: ResourceId = "Exec[gitolite_setup]".parse().unwrap();
/// assert_eq!(id.kind, ResourceKind::Exec);
/// assert_eq!(id.name, "gitolite_setup");
/// assert_eq!(id.to_string(), "Exec[gitolite_setup]");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource name (a path, package name, user name, …).
    pub name: String,
}

impl ResourceId {
    /// Create an identifier.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s
            .split_once('[')
            .ok_or_else(|| format!("invalid resource reference '{s}': expected Kind[name]"))?;
        let name = rest
            .strip_suffix(']')
            .filter(|n| !n.is_empty())
            .ok_or_else(|| format!("invalid resource reference '{s}': expected Kind[name]"))?;
        Ok(Self::new(kind.trim().parse()?, name))
    }
}

impl TryFrom<String> for ResourceId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Boolean flag (`managehome = true`).
    Bool(bool),
    /// Integer (`timeout = 300`).
    Int(i64),
    /// Free-form string.
    Str(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

/// Mapping of option → value for a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttrValue>);

impl Attributes {
    /// Empty attribute map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Raw value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    /// Value of `key` rendered as a string (`true`, `300`, `/srv/git`).
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.0.get(key).map(ToString::to_string)
    }

    /// Value of `key` as a boolean; strings `"true"`/`"yes"` count as true.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is present but not boolean-like.
    pub fn get_bool(&self, key: &str) -> anyhow::Result<Option<bool>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(AttrValue::Bool(b)) => Ok(Some(*b)),
            Some(AttrValue::Str(s)) => match s.as_str() {
                "true" | "yes" => Ok(Some(true)),
                "false" | "no" => Ok(Some(false)),
                other => anyhow::bail!("attribute '{key}' is not a boolean: {other}"),
            },
            Some(AttrValue::Int(i)) => anyhow::bail!("attribute '{key}' is not a boolean: {i}"),
        }
    }

    /// Value of `key` as an unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is present but not a non-negative integer.
    pub fn get_u64(&self, key: &str) -> anyhow::Result<Option<u64>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(AttrValue::Int(i)) => u64::try_from(*i)
                .map(Some)
                .map_err(|_| anyhow::anyhow!("attribute '{key}' must not be negative: {i}")),
            Some(AttrValue::Str(s)) => s
                .parse()
                .map(Some)
                .map_err(|_| anyhow::anyhow!("attribute '{key}' is not an integer: {s}")),
            Some(AttrValue::Bool(b)) => anyhow::bail!("attribute '{key}' is not an integer: {b}"),
        }
    }

    /// Value of `key` as a string, failing if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute is not set.
    pub fn require_str(&self, key: &str) -> anyhow::Result<String> {
        self.get_str(key)
            .ok_or_else(|| anyhow::anyhow!("missing required attribute '{key}'"))
    }

    /// Iterate over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<AttrValue>> FromIterator<(K, V)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Predicate deciding whether a resource's action must run.
///
/// Serialised externally tagged in snake case, e.g. `{ creates = "/path" }`
/// or `"refresh_only"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    /// Satisfied once `path` exists.
    Creates(String),
    /// Satisfied when the shell command exits zero.
    Unless(String),
    /// Must run only when the shell command exits zero.
    Onlyif(String),
    /// Must run only when a watched resource changed during this run.
    RefreshOnly,
    /// Must run only when every inner guard says so.
    All(Vec<Self>),
}

/// Declarative description of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource name; unique per kind.
    pub name: String,
    /// Kind-specific options.
    #[serde(default, skip_serializing_if = "is_empty_attrs")]
    pub attributes: Attributes,
    /// Resources that must converge before this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require: Vec<ResourceId>,
    /// Resources that must converge after this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before: Vec<ResourceId>,
    /// Watched resources: ordering edge plus refresh trigger.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscribe: Vec<ResourceId>,
    /// Resources that watch this one (reverse of `subscribe`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<ResourceId>,
    /// Optional guard predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Guard>,
}

fn is_empty_attrs(attrs: &Attributes) -> bool {
    attrs.0.is_empty()
}

impl ResourceSpec {
    /// Create a spec with no attributes, relationships or guard.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            attributes: Attributes::new(),
            require: Vec::new(),
            before: Vec::new(),
            subscribe: Vec::new(),
            notify: Vec::new(),
            guard: None,
        }
    }

    /// Identifier of this spec.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.kind, self.name.clone())
    }

    /// Builder: set an attribute.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key, value);
        self
    }

    /// Builder: add a `require` edge.
    #[must_use]
    pub fn requires(mut self, id: ResourceId) -> Self {
        self.require.push(id);
        self
    }

    /// Builder: add a `before` edge.
    #[must_use]
    pub fn before(mut self, id: ResourceId) -> Self {
        self.before.push(id);
        self
    }

    /// Builder: watch another resource.
    #[must_use]
    pub fn subscribes(mut self, id: ResourceId) -> Self {
        self.subscribe.push(id);
        self
    }

    /// Builder: notify another resource.
    #[must_use]
    pub fn notifies(mut self, id: ResourceId) -> Self {
        self.notify.push(id);
        self
    }

    /// Builder: set the guard.
    #[must_use]
    pub fn guarded(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }
}
