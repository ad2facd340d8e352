#![allow(clippy::collapsible_if)]

use hyper::header::{HeaderName, HeaderValue};

use crate::{
    config::models::{AuditorSpec, Manifest, RouteRule, Selector},
    core::{
        pluggable::{Capability, PluggableSpec},
        substitute::has_placeholders,
    },
    ports::capability_loader::CapabilityLoader,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Unknown module '{locator}' in '{field}'")]
    UnknownModule { field: String, locator: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Manifest validator
///
/// Patterns are already compiled when a manifest exists, so what is left to check
/// are URLs, header templates, selectors and module locators. Locators and URLs
/// containing `${VAR}` placeholders are only known at request time and are
/// skipped.
pub struct ManifestValidator;

impl ManifestValidator {
    /// Validate the entire manifest, collecting every error found
    pub fn validate(manifest: &Manifest, loader: &dyn CapabilityLoader) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if manifest.target.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "target".to_string(),
            });
        } else if let Err(e) = Self::validate_url(&manifest.target, "target") {
            errors.push(e);
        }

        if let Some(spec) = &manifest.roles_provider {
            errors.extend(Self::validate_pluggable(
                &spec.source,
                "rolesProvider",
                loader,
            ));
        }

        for (i, spec) in manifest.auditors.iter().enumerate() {
            errors.extend(Self::validate_auditor(i, spec, loader));
        }

        if manifest.route_rules.is_empty() {
            tracing::warn!("Manifest declares no route rules, every request will be unmatched");
        }
        for (i, rule) in manifest.route_rules.iter().enumerate() {
            errors.extend(Self::validate_rule(i, rule));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn validate_pluggable<C: ?Sized + Capability>(
        spec: &PluggableSpec<C>,
        context: &str,
        loader: &dyn CapabilityLoader,
    ) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(module) = &spec.module {
            if module.trim().is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: format!("{context}.module"),
                    message: "Module locator cannot be empty".to_string(),
                });
            } else if !has_placeholders(module) && C::load(loader, module).is_none() {
                errors.push(ValidationError::UnknownModule {
                    field: format!("{context}.module"),
                    locator: module.clone(),
                });
            }
        }

        if let Some(service) = &spec.service {
            if !has_placeholders(service) {
                if let Err(e) = Self::validate_url(service, &format!("{context}.service")) {
                    errors.push(e);
                }
            }
        }

        errors
    }

    fn validate_auditor(
        index: usize,
        spec: &AuditorSpec,
        loader: &dyn CapabilityLoader,
    ) -> Vec<ValidationError> {
        let context = format!("auditors[{index}]");
        let mut errors = Self::validate_pluggable(&spec.source, &context, loader);

        if spec.source.is_empty() && spec.chain.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: context.clone(),
                message: "Auditor declares neither a handler nor a chain".to_string(),
            });
        }

        for (i, link) in spec.chain.iter().enumerate() {
            let link_context = format!("{context}.chain[{i}]");
            if link.is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: link_context.clone(),
                    message: "Chain link declares no module or service".to_string(),
                });
            }
            errors.extend(Self::validate_pluggable(link, &link_context, loader));
        }

        errors.extend(Self::validate_selector(&spec.kind, &format!("{context}.kind")));
        errors.extend(Self::validate_selector(
            &spec.method,
            &format!("{context}.method"),
        ));
        errors.extend(Self::validate_selector(
            &spec.pattern,
            &format!("{context}.pattern"),
        ));
        errors
    }

    fn validate_rule(index: usize, rule: &RouteRule) -> Vec<ValidationError> {
        let context = format!("routeRules[{index}]");
        let mut errors = Vec::new();

        errors.extend(Self::validate_selector(
            &rule.pattern,
            &format!("{context}.pattern"),
        ));
        errors.extend(Self::validate_selector(
            &rule.method,
            &format!("{context}.method"),
        ));
        errors.extend(Self::validate_selector(&rule.role, &format!("{context}.role")));

        for (name, template) in &rule.headers {
            let field = format!("{context}.headers.{name}");
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                errors.push(ValidationError::InvalidField {
                    field,
                    message: "Not a valid HTTP header name".to_string(),
                });
            } else if !has_placeholders(template) && HeaderValue::from_str(template).is_err() {
                errors.push(ValidationError::InvalidField {
                    field,
                    message: "Not a valid HTTP header value".to_string(),
                });
            }
        }

        if !rule.allow && !rule.headers.is_empty() {
            tracing::warn!("{} denies requests, its headers are never applied", context);
        }

        errors
    }

    /// An explicit empty list can never match.
    fn validate_selector<T>(selector: &Selector<T>, field: &str) -> Option<ValidationError> {
        match selector {
            Selector::Only(values) if values.is_empty() => Some(ValidationError::InvalidField {
                field: field.to_string(),
                message: "List cannot be empty, use \"*\" to match anything".to_string(),
            }),
            _ => None,
        }
    }

    /// Format multiple validation errors into a single readable message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
