//! `${VAR}` placeholder substitution for header templates and locators.
use std::{collections::HashMap, sync::LazyLock};

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use regex::{Captures, Regex};

use crate::ports::environment::Environment;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid")
});

/// Replace every `${NAME}` in `template` with the value of `NAME` from `env`.
///
/// Undefined variables are replaced with the empty string. Text without
/// placeholders is returned unchanged.
pub fn substitute(template: &str, env: &dyn Environment) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            env.var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// True if `template` contains at least one placeholder.
pub fn has_placeholders(template: &str) -> bool {
    PLACEHOLDER.is_match(template)
}

/// Overlay the substituted `templates` onto a copy of `base`.
///
/// Only the declared header names are replaced; every other header in `base`
/// is preserved. Pairs that do not form a valid header after substitution are
/// skipped with a warning.
pub fn substitute_headers(
    templates: &HashMap<String, String>,
    base: &HeaderMap,
    env: &dyn Environment,
) -> HeaderMap {
    let mut headers = base.clone();
    for (name, template) in templates {
        let value = substitute(template, env);
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!("Skipping invalid header template: {} = {}", name, template),
        }
    }
    headers
}
