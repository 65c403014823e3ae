#![allow(clippy::collapsible_if)]

use std::{net::IpAddr, sync::LazyLock};

use regex::Regex;

use crate::config::models::{
    ApiDefinition, AuthenticationConfig, GatewayConfig, PolicySpec, ThrottleKey,
    ThrottlingConfig,
};

static API_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\- ]*$").expect("invalid name regex"));

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Validator for the top-level gateway configuration
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_address) {
            errors.push(e);
        }

        if config.admin_port != 0 && config.admin_port == config.listen_port {
            errors.push(ValidationError::InvalidField {
                field: "adminPort".to_string(),
                message: format!(
                    "Admin port {} must differ from listen port",
                    config.admin_port
                ),
            });
        }

        if let Some(timeout) = &config.default_timeout {
            if let Err(e) = validate_timeout(timeout.to_duration(), "defaultTimeout") {
                errors.push(e);
            }
        }

        if let Some(database) = &config.database {
            if database.host.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: "database.host".to_string(),
                });
            }
        }

        if tracing_subscriber::EnvFilter::try_new(&config.logger.level).is_err() {
            errors.push(ValidationError::InvalidField {
                field: "logger.level".to_string(),
                message: format!("'{}' is not a valid log filter", config.logger.level),
            });
        }

        finish(errors)
    }

    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<IpAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be an IP address (e.g., '127.0.0.1' or '0.0.0.0')".to_string(),
            });
        }
        Ok(())
    }
}

/// Validator for a single API definition
pub struct ApiDefinitionValidator;

impl ApiDefinitionValidator {
    pub fn validate(api: &ApiDefinition) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_name(&api.name) {
            errors.push(e);
        }

        if let Some(version) = &api.version {
            if version.trim().is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: "version".to_string(),
                    message: "Version cannot be empty when present".to_string(),
                });
            }
        }

        if api.proxy.path.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "proxy.path".to_string(),
            });
        } else if api.proxy.path.contains(['?', '#']) {
            errors.push(ValidationError::InvalidField {
                field: "proxy.path".to_string(),
                message: "Public path cannot contain a query or fragment".to_string(),
            });
        }

        if let Err(e) = Self::validate_url(&api.proxy.target.path, "proxy.target.path") {
            errors.push(e);
        }

        if let Some(timeout) = &api.proxy.timeout {
            if let Err(e) = validate_timeout(timeout.to_duration(), "proxy.timeout") {
                errors.push(e);
            }
        }

        for (i, spec) in api.proxy.filter.iter().enumerate() {
            if let Err(e) = Self::validate_policy_spec(spec, &format!("proxy.filter[{i}]")) {
                errors.push(e);
            }
        }
        for (i, spec) in api.proxy.interceptor.request.iter().enumerate() {
            if let Err(e) =
                Self::validate_policy_spec(spec, &format!("proxy.interceptor.request[{i}]"))
            {
                errors.push(e);
            }
        }
        for (i, spec) in api.proxy.interceptor.response.iter().enumerate() {
            if let Err(e) =
                Self::validate_policy_spec(spec, &format!("proxy.interceptor.response[{i}]"))
            {
                errors.push(e);
            }
        }

        if let Some(throttling) = &api.throttling {
            if let Err(mut throttling_errors) = Self::validate_throttling(throttling) {
                errors.append(&mut throttling_errors);
            }
        }

        if let Some(authentication) = &api.authentication {
            if let Err(e) = Self::validate_authentication(authentication) {
                errors.push(e);
            }
        }

        finish(errors)
    }

    fn validate_name(name: &str) -> ValidationResult<()> {
        if name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "name".to_string(),
            });
        }

        if !API_NAME.is_match(name) {
            return Err(ValidationError::InvalidField {
                field: "name".to_string(),
                message: format!("Invalid API name '{name}'"),
            });
        }
        Ok(())
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

                if url.query().is_some() || url.fragment().is_some() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "Target cannot carry a query or fragment".to_string(),
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

    fn validate_policy_spec(spec: &PolicySpec, context: &str) -> ValidationResult<()> {
        if spec.name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: format!("{context}.name"),
            });
        }
        Ok(())
    }

    fn validate_throttling(config: &ThrottlingConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if config.max == 0 || config.max > u32::MAX as u64 {
            errors.push(ValidationError::InvalidField {
                field: "throttling.max".to_string(),
                message: "Must be between 1 and 4294967295".to_string(),
            });
        }

        match humantime::parse_duration(&config.time_window) {
            Ok(window) if window.is_zero() => errors.push(ValidationError::InvalidField {
                field: "throttling.timeWindow".to_string(),
                message: "Time window must be greater than zero".to_string(),
            }),
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::InvalidField {
                field: "throttling.timeWindow".to_string(),
                message: format!("Invalid duration '{}': {e}", config.time_window),
            }),
        }

        if config.by == ThrottleKey::Header && config.header_name.is_none() {
            errors.push(ValidationError::MissingField {
                field: "throttling.headerName".to_string(),
            });
        }

        if http::StatusCode::from_u16(config.status_code).is_err() {
            errors.push(ValidationError::InvalidField {
                field: "throttling.statusCode".to_string(),
                message: format!("{} is not a valid HTTP status", config.status_code),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_authentication(config: &AuthenticationConfig) -> ValidationResult<()> {
        match config {
            AuthenticationConfig::Basic { users, .. } if users.is_empty() => {
                Err(ValidationError::InvalidField {
                    field: "authentication.users".to_string(),
                    message: "Basic authentication needs at least one user".to_string(),
                })
            }
            AuthenticationConfig::ApiKey { keys, .. } if keys.is_empty() => {
                Err(ValidationError::InvalidField {
                    field: "authentication.keys".to_string(),
                    message: "API key authentication needs at least one key".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

fn validate_timeout(
    duration: Result<std::time::Duration, String>,
    field: &str,
) -> ValidationResult<()> {
    match duration {
        Ok(d) if d.is_zero() => Err(ValidationError::InvalidField {
            field: field.to_string(),
            message: "Timeout must be greater than zero".to_string(),
        }),
        Ok(_) => Ok(()),
        Err(message) => Err(ValidationError::InvalidField {
            field: field.to_string(),
            message,
        }),
    }
}

fn finish(errors: Vec<ValidationError>) -> ValidationResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::ValidationFailed {
            message: format_multiple_errors(errors),
        })
    }
}

/// Format multiple validation errors into a single message
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
