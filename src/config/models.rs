//! Manifest data structures for rulegate.
//!
//! These types map directly to YAML / JSON / TOML manifest documents. Inline
//! functions cannot be expressed in a document, so they are attached through the
//! builder methods instead (see [`RolesProviderSpec::inline`] and [`AuditorSpec::inline`]).
use std::{collections::HashMap, fmt, marker::PhantomData, str::FromStr, sync::Arc};

use http::Method;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
};

use crate::core::{
    audit::{AuditKind, Auditor},
    pattern::{PatternError, RoutePattern},
    pluggable::PluggableSpec,
    roles::RolesProvider,
};

/// A single role as returned by a roles provider and declared in a rule.
pub type Role = String;

/// Free-form parameters handed to a pluggable function or service.
pub type Params = HashMap<String, String>;

/// `"*"`, a single value, or a list of values.
///
/// Used for the method, role, kind and pattern fields of the manifest.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector<T> {
    /// The wildcard `"*"`
    Any,
    /// One or more explicit values
    Only(Vec<T>),
}

impl<T> Default for Selector<T> {
    fn default() -> Self {
        Selector::Any
    }
}

impl<T> Selector<T> {
    /// Selector holding a single value.
    pub fn one(value: T) -> Self {
        Selector::Only(vec![value])
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Selector::Any)
    }
}

impl<T: PartialEq> Selector<T> {
    /// True for the wildcard, or if `value` is listed.
    pub fn admits(&self, value: &T) -> bool {
        match self {
            Selector::Any => true,
            Selector::Only(values) => values.contains(value),
        }
    }
}

impl<T> From<Vec<T>> for Selector<T> {
    fn from(values: Vec<T>) -> Self {
        Selector::Only(values)
    }
}

impl<T> FromStr for Selector<T>
where
    T: FromStr,
{
    type Err = T::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            Ok(Selector::Any)
        } else {
            Ok(Selector::one(s.parse()?))
        }
    }
}

impl<T: fmt::Display> Serialize for Selector<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Selector::Any => serializer.serialize_str("*"),
            Selector::Only(values) if values.len() == 1 => {
                serializer.collect_str(&values[0])
            }
            Selector::Only(values) => serializer.collect_seq(values.iter().map(|v| v.to_string())),
        }
    }
}

impl<'de, T> Deserialize<'de> for Selector<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SelectorVisitor<T>(PhantomData<T>);

        impl<'de, T> Visitor<'de> for SelectorVisitor<T>
        where
            T: FromStr,
            T::Err: fmt::Display,
        {
            type Value = Selector<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("\"*\", a string, or a list of strings")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut values = Vec::new();
                while let Some(item) = seq.next_element::<String>()? {
                    if item == "*" {
                        // drain the rest so the deserializer stays consistent
                        while seq.next_element::<de::IgnoredAny>()?.is_some() {}
                        return Ok(Selector::Any);
                    }
                    values.push(item.parse().map_err(de::Error::custom)?);
                }
                Ok(Selector::Only(values))
            }
        }

        deserializer.deserialize_any(SelectorVisitor(PhantomData))
    }
}

/// Declares the rules for access to an API, and the mapping from proxy route
/// to target route.
///
/// `https://proxy.example.com/<path>` is forwarded to `<target>/<path>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// The base URL of the target service
    pub target: String,
    /// Determines the role(s) of a request
    #[serde(default, alias = "rolesprovider", alias = "roles_provider")]
    pub roles_provider: Option<RolesProviderSpec>,
    #[serde(default)]
    pub auditors: Vec<AuditorSpec>,
    /// Evaluated in declaration order; the first applicable rule wins
    #[serde(default, alias = "routerules", alias = "route_rules")]
    pub route_rules: Vec<Arc<RouteRule>>,
}

impl Manifest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn with_roles_provider(mut self, spec: RolesProviderSpec) -> Self {
        self.roles_provider = Some(spec);
        self
    }

    pub fn with_auditor(mut self, spec: AuditorSpec) -> Self {
        self.auditors.push(spec);
        self
    }

    pub fn with_rule(mut self, rule: RouteRule) -> Self {
        self.route_rules.push(Arc::new(rule));
        self
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Decides whether a request is proxied, and which headers are set on the
/// outgoing request when it is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Request URL patterns, defaults to `"*"`
    #[serde(default)]
    pub pattern: Selector<RoutePattern>,
    /// Request methods, defaults to `"*"`
    #[serde(default)]
    pub method: Selector<Method>,
    /// Roles, at least one of which the caller must hold. Defaults to `"*"`
    #[serde(default)]
    pub role: Selector<Role>,
    /// Defaults to false (deny)
    #[serde(default, skip_serializing_if = "is_false")]
    pub allow: bool,
    /// Header templates; values may contain `${VAR}` placeholders
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl RouteRule {
    /// Rule matching the given pattern (`"*"` for any), denying by default.
    pub fn matching(pattern: &str) -> Result<Self, PatternError> {
        Ok(Self {
            pattern: pattern.parse()?,
            ..Default::default()
        })
    }

    pub fn allowed(mut self) -> Self {
        self.allow = true;
        self
    }

    pub fn with_role(mut self, role: impl Into<Role>) -> Self {
        match &mut self.role {
            Selector::Only(roles) => roles.push(role.into()),
            Selector::Any => self.role = Selector::one(role.into()),
        }
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        match &mut self.method {
            Selector::Only(methods) => methods.push(method),
            Selector::Any => self.method = Selector::one(method),
        }
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.headers.insert(name.into(), template.into());
        self
    }
}

impl fmt::Display for RouteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = match &self.method {
            Selector::Any => "*".to_string(),
            Selector::Only(methods) => methods
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(","),
        };
        let pattern = match &self.pattern {
            Selector::Any => "*".to_string(),
            Selector::Only(patterns) => patterns
                .iter()
                .map(RoutePattern::as_str)
                .collect::<Vec<_>>()
                .join(","),
        };
        write!(f, "{method} {pattern}")
    }
}

/// Declares how the roles of a request are determined.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolesProviderSpec {
    /// Hardcoded roles, overriding every other source. Mainly for testing.
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    pub as_roles: Option<Vec<Role>>,
    #[serde(flatten)]
    pub source: PluggableSpec<dyn RolesProvider>,
}

impl RolesProviderSpec {
    /// Spec that always yields `roles`.
    pub fn fixed<I, R>(roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        Self {
            as_roles: Some(roles.into_iter().map(Into::into).collect()),
            source: PluggableSpec::default(),
        }
    }

    pub fn inline(provider: Arc<dyn RolesProvider>) -> Self {
        Self {
            as_roles: None,
            source: PluggableSpec::inline(provider),
        }
    }

    pub fn module(locator: impl Into<String>) -> Self {
        Self {
            as_roles: None,
            source: PluggableSpec::module(locator),
        }
    }

    pub fn service(url: impl Into<String>) -> Self {
        Self {
            as_roles: None,
            source: PluggableSpec::service(url),
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.source.params = params;
        self
    }
}

/// Declares an auditor: filters deciding which events it sees, an optional
/// chain of pre-processing auditors, and its own handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditorSpec {
    /// Event kinds handled, defaults to `"*"`
    #[serde(default)]
    pub kind: Selector<AuditKind>,
    /// URL pattern filter, defaults to `"*"`
    #[serde(default)]
    pub pattern: Selector<RoutePattern>,
    /// Method filter, defaults to `"*"`
    #[serde(default)]
    pub method: Selector<Method>,
    #[serde(flatten)]
    pub source: PluggableSpec<dyn Auditor>,
    /// Runs before `source`; each link sees the previous link's result
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<PluggableSpec<dyn Auditor>>,
}

impl AuditorSpec {
    pub fn inline(auditor: Arc<dyn Auditor>) -> Self {
        Self {
            source: PluggableSpec::inline(auditor),
            ..Default::default()
        }
    }

    pub fn module(locator: impl Into<String>) -> Self {
        Self {
            source: PluggableSpec::module(locator),
            ..Default::default()
        }
    }

    pub fn service(url: impl Into<String>) -> Self {
        Self {
            source: PluggableSpec::service(url),
            ..Default::default()
        }
    }

    pub fn for_kinds(mut self, kinds: impl IntoIterator<Item = AuditKind>) -> Self {
        self.kind = Selector::Only(kinds.into_iter().collect());
        self
    }

    pub fn with_pattern(mut self, pattern: Selector<RoutePattern>) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_method(mut self, method: Selector<Method>) -> Self {
        self.method = method;
        self
    }

    pub fn with_link(mut self, link: PluggableSpec<dyn Auditor>) -> Self {
        self.chain.push(link);
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.source.params = params;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_defaults_from_json() {
        let rule: RouteRule = serde_json::from_str(r#"{"pattern": "/v1/*"}"#).unwrap();
        assert!(!rule.allow);
        assert!(rule.method.is_any());
        assert!(rule.role.is_any());
        assert!(rule.headers.is_empty());
        assert!(matches!(rule.pattern, Selector::Only(ref p) if p.len() == 1));
    }

    #[test]
    fn test_selector_forms() {
        let any: Selector<Role> = serde_json::from_str(r#""*""#).unwrap();
        assert_eq!(any, Selector::Any);

        let one: Selector<Method> = serde_json::from_str(r#""POST""#).unwrap();
        assert_eq!(one, Selector::one(Method::POST));

        let many: Selector<Role> = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert!(many.admits(&"b".to_string()));
        assert!(!many.admits(&"c".to_string()));

        let with_wildcard: Selector<Role> = serde_json::from_str(r#"["a", "*"]"#).unwrap();
        assert!(with_wildcard.is_any());
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result: Result<RouteRule, _> = serde_json::from_str(r#"{"pattern": "/v1/{oops"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_manifest_camel_case_fields() {
        let manifest: Manifest = serde_json::from_str(
            r#"{
                "target": "https://api.example.com",
                "rolesProvider": { "as": ["domain:example.com"] },
                "auditors": [{ "kind": ["denied", "error"], "module": "console", "params": { "log": "roles" } }],
                "routeRules": [
                    { "pattern": "/v1/files{/*}?", "allow": false },
                    { "pattern": "/v1/*", "role": "domain:example.com", "allow": true,
                      "headers": { "Authorization": "Bearer ${API_KEY}" } }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.route_rules.len(), 2);
        assert_eq!(
            manifest.roles_provider.unwrap().as_roles,
            Some(vec!["domain:example.com".to_string()])
        );
        let auditor = &manifest.auditors[0];
        assert!(auditor.kind.admits(&AuditKind::Denied));
        assert!(!auditor.kind.admits(&AuditKind::Request));
        assert_eq!(auditor.source.module.as_deref(), Some("console"));
        assert_eq!(auditor.source.params.get("log").map(String::as_str), Some("roles"));
    }

    #[test]
    fn test_auditor_chain_from_json() {
        let spec: AuditorSpec = serde_json::from_str(
            r#"{ "service": "http://audit.local/events",
                 "chain": [{ "module": "redact", "params": { "field": "authorization" } }] }"#,
        )
        .unwrap();
        assert!(spec.kind.is_any());
        assert_eq!(spec.source.service.as_deref(), Some("http://audit.local/events"));
        assert_eq!(spec.chain.len(), 1);
        assert_eq!(spec.chain[0].module.as_deref(), Some("redact"));
        assert_eq!(spec.chain[0].params["field"], "authorization");
    }

    #[test]
    fn test_rule_display() {
        let rule = RouteRule::matching("/v1/*")
            .unwrap()
            .with_method(Method::GET)
            .with_method(Method::POST);
        assert_eq!(rule.to_string(), "GET,POST /v1/*");
        assert_eq!(RouteRule::default().to_string(), "* *");
    }
}
