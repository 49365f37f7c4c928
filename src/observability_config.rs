//! # Observability Configuration
//!
//! Environment-specific settings for logging, metrics and trace export.

use std::env;

/// Observability configuration for different environments
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Environment name (development, staging, production)
    pub environment: String,
    /// OTLP endpoint for trace export
    pub otlp_endpoint: Option<String>,
    /// Port of the metrics and health server
    pub metrics_port: u16,
    /// Level for the `recibo_ocr` log target
    pub log_level: String,
    /// Whether to enable trace sampling
    pub enable_trace_sampling: bool,
    /// Trace sampling ratio (0.0-1.0)
    pub trace_sampling_ratio: f64,
    /// Whether to install the Prometheus recorder and serve `/metrics`
    pub enable_metrics_export: bool,
    /// Global labels attached to every metric
    pub tags: Vec<(String, String)>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            otlp_endpoint: None,
            metrics_port: 9090,
            log_level: "info".to_string(),
            enable_trace_sampling: false,
            trace_sampling_ratio: 1.0,
            enable_metrics_export: true,
            tags: Vec::new(),
        }
    }
}

impl ObservabilityConfig {
    /// Start from the preset of `ENVIRONMENT`, then apply explicit overrides
    pub fn from_env() -> Self {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let mut config = presets::for_environment(&environment);

        config.otlp_endpoint = env::var("OTLP_ENDPOINT").ok().filter(|v| !v.trim().is_empty());
        if let Some(port) = env::var("METRICS_PORT").ok().and_then(|v| v.parse().ok()) {
            config.metrics_port = port;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(enabled) = env::var("ENABLE_TRACE_SAMPLING").ok().and_then(|v| v.parse().ok()) {
            config.enable_trace_sampling = enabled;
        }
        if let Some(ratio) = env::var("TRACE_SAMPLING_RATIO").ok().and_then(|v| v.parse().ok()) {
            config.trace_sampling_ratio = ratio;
        }
        if let Some(enabled) = env::var("ENABLE_METRICS_EXPORT").ok().and_then(|v| v.parse().ok()) {
            config.enable_metrics_export = enabled;
        }

        config.add_default_tags();
        if let Ok(tags) = env::var("OBSERVABILITY_TAGS") {
            config.tags.extend(parse_tags(&tags));
        }
        config
    }

    fn add_default_tags(&mut self) {
        self.tags.push(("environment".to_string(), self.environment.clone()));
        self.tags.push(("service".to_string(), "recibo-ocr".to_string()));

        if let Ok(version) = env::var("SERVICE_VERSION") {
            self.tags.push(("version".to_string(), version));
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn get_tags(&self) -> Vec<(String, String)> {
        self.tags.clone()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(endpoint) = &self.otlp_endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(format!("Invalid OTLP endpoint format: {}", endpoint));
            }
        }

        if !(0.0..=1.0).contains(&self.trace_sampling_ratio) {
            return Err(format!("Invalid trace sampling ratio: {}", self.trace_sampling_ratio));
        }

        if self.metrics_port == 0 {
            return Err(format!("Invalid metrics port: {}", self.metrics_port));
        }

        Ok(())
    }
}

/// Parse `key1=value1,key2=value2`; malformed pairs are skipped
fn parse_tags(tags_str: &str) -> Vec<(String, String)> {
    tags_str
        .split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Environment-specific configuration presets
pub mod presets {
    use super::ObservabilityConfig;

    pub fn for_environment(environment: &str) -> ObservabilityConfig {
        match environment {
            "production" => production(),
            "staging" => staging(),
            "minimal" => minimal(),
            "development" => development(),
            other => ObservabilityConfig {
                environment: other.to_string(),
                ..Default::default()
            },
        }
    }

    /// Everything on, debug logs
    pub fn development() -> ObservabilityConfig {
        ObservabilityConfig {
            environment: "development".to_string(),
            enable_trace_sampling: false,
            trace_sampling_ratio: 1.0,
            enable_metrics_export: true,
            log_level: "debug".to_string(),
            ..Default::default()
        }
    }

    pub fn staging() -> ObservabilityConfig {
        ObservabilityConfig {
            environment: "staging".to_string(),
            enable_trace_sampling: true,
            trace_sampling_ratio: 0.5,
            enable_metrics_export: true,
            log_level: "info".to_string(),
            ..Default::default()
        }
    }

    pub fn production() -> ObservabilityConfig {
        ObservabilityConfig {
            environment: "production".to_string(),
            enable_trace_sampling: true,
            trace_sampling_ratio: 0.1,
            enable_metrics_export: true,
            log_level: "info".to_string(),
            ..Default::default()
        }
    }

    /// For one-off batch runs: no health server, errors only
    pub fn minimal() -> ObservabilityConfig {
        ObservabilityConfig {
            environment: "minimal".to_string(),
            enable_trace_sampling: true,
            trace_sampling_ratio: 0.01,
            enable_metrics_export: false,
            log_level: "error".to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.environment, "development");
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.log_level, "info");
        assert!(!config.enable_trace_sampling);
        assert_eq!(config.trace_sampling_ratio, 1.0);
        assert!(config.enable_metrics_export);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ObservabilityConfig::default();
        assert!(config.validate().is_ok());

        config.otlp_endpoint = Some("invalid-endpoint".to_string());
        assert!(config.validate().is_err());

        config.otlp_endpoint = Some("http://collector:4317".to_string());
        config.trace_sampling_ratio = 1.5;
        assert!(config.validate().is_err());

        config.trace_sampling_ratio = 1.0;
        config.metrics_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tag_parsing() {
        let tags = parse_tags("env=prod, version=1.2.3,broken,=empty,sucursal=centro");
        assert_eq!(
            tags,
            vec![
                ("env".to_string(), "prod".to_string()),
                ("version".to_string(), "1.2.3".to_string()),
                ("sucursal".to_string(), "centro".to_string()),
            ]
        );
    }

    #[test]
    fn test_presets() {
        let prod = presets::for_environment("production");
        assert!(prod.is_production());
        assert!(prod.enable_trace_sampling);
        assert_eq!(prod.trace_sampling_ratio, 0.1);

        let minimal = presets::for_environment("minimal");
        assert!(!minimal.enable_metrics_export);

        let custom = presets::for_environment("qa");
        assert_eq!(custom.environment, "qa");
        assert!(!custom.is_development());
    }
}
