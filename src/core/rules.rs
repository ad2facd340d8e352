//! Rule evaluation.
//!
//! Rules are tried strictly in declaration order. A rule applies when its method,
//! role and pattern predicates all hold; the first applicable rule ends the search,
//! later rules are never looked at.
use std::sync::Arc;

use hyper::Method;

use crate::{
    config::models::{RouteRule, Selector},
    core::{pattern, roles::RoleSet},
};

/// True if `method` is admitted by the rule.
pub fn method_applies(rule: &RouteRule, method: &Method) -> bool {
    rule.method.admits(method)
}

/// True if the rule's role is the wildcard, or the caller holds one of its roles.
pub fn role_applies(rule: &RouteRule, roles: &RoleSet) -> bool {
    match &rule.role {
        Selector::Any => true,
        Selector::Only(required) => required.iter().any(|role| roles.contains(role)),
    }
}

/// True if any of the rule's patterns matches `path`.
pub fn pattern_applies(rule: &RouteRule, path: &str) -> bool {
    pattern::matches(&rule.pattern, path)
}

/// True if all three predicates hold.
pub fn rule_applies(rule: &RouteRule, method: &Method, path: &str, roles: &RoleSet) -> bool {
    method_applies(rule, method) && role_applies(rule, roles) && pattern_applies(rule, path)
}

/// The first rule in `rules` for which `applies` holds.
///
/// `applies` is not called for any rule after the selected one.
pub fn first_applicable<'r, F>(
    rules: &'r [Arc<RouteRule>],
    mut applies: F,
) -> Option<&'r Arc<RouteRule>>
where
    F: FnMut(&RouteRule) -> bool,
{
    rules.iter().find(|rule| applies(rule.as_ref()))
}

/// Select the rule governing a request.
pub fn select_rule<'r>(
    rules: &'r [Arc<RouteRule>],
    method: &Method,
    path: &str,
    roles: &RoleSet,
) -> Option<&'r Arc<RouteRule>> {
    let selected = first_applicable(rules, |rule| rule_applies(rule, method, path, roles));
    match selected {
        Some(rule) => tracing::debug!(rule = %rule, allow = rule.allow, "Rule selected for {} {}", method, path),
        None => tracing::debug!("No rule applies to {} {}", method, path),
    }
    selected
}
