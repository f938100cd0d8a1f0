//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::AnycastConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::health::ProbeRegistry;

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

/// Load and validate configuration from a TOML file.
///
/// Probe kinds are checked against `registry`, so kinds registered by the
/// caller are accepted.
pub fn load_config(path: &Path, registry: &ProbeRegistry) -> Result<AnycastConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content, registry)
}

/// Parse, default and validate configuration text.
pub fn parse_config(content: &str, registry: &ProbeRegistry) -> Result<AnycastConfig, ConfigError> {
    let mut config: AnycastConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    config.apply_defaults();

    validate_config(&config, registry).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_file() {
        let err = load_config(
            &PathBuf::from("/nonexistent/anycast-router.toml"),
            &ProbeRegistry::with_builtins(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
        assert!(err.to_string().starts_with("IO error: "));
    }

    #[test]
    fn test_parse_error() {
        let err = parse_config("route_tables = 7", &ProbeRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_errors_joined() {
        let src = r#"
            [route_tables.a.find]
            type = "main"
            [route_tables.b.find]
            type = "main"
        "#;
        let err = parse_config(src, &ProbeRegistry::with_builtins()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: No manage_routes key in route table 'a', \
             No manage_routes key in route table 'b'"
        );
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let src = r#"
            [route_tables.main.find]
            type = "main"
            [[route_tables.main.manage_routes]]
            cidr = "10.1.1.1"
        "#;
        let config = parse_config(src, &ProbeRegistry::with_builtins()).unwrap();
        assert_eq!(config.poll_time_secs, 300);
        let route = &config.route_tables["main"].manage_routes[0];
        assert_eq!(route.cidr, "10.1.1.1/32");
        assert_eq!(route.instance, "SELF");
    }
}
