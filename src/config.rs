use crate::error::{Result, RotatorError};
use crate::gateway::ProvisionConfig;
use crate::models::{Region, RegionPreset};
use crate::rotator::IpRotatorBuilder;
use crate::transport::TransportConfig;
use crate::IpRotator;
use std::env;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Gateway pool configuration
    pub rotator: RotatorConfig,
    /// Local listener configuration
    pub server: ServerConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct RotatorConfig {
    /// Origin every request is relayed to
    pub site: String,
    /// Explicit region list (comma-separated, overrides the preset)
    pub regions: Vec<Region>,
    /// Region preset (default, extra, all)
    pub region_preset: RegionPreset,
    /// Log per-region progress at info level
    pub verbose: bool,
    /// Always create new gateways instead of reusing existing ones
    pub force: bool,
    /// Name gateways so that shutdown never deletes them
    pub manual_deletion: bool,
    /// Delay between readiness checks in milliseconds
    pub poll_interval_ms: u64,
    /// Readiness bound in seconds
    pub ready_timeout: u64,
    /// Control-plane endpoint override (local emulators)
    pub endpoint_url: Option<Url>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port for the local listener (default: 8000)
    pub port: u16,
    /// Host to bind to (default: 127.0.0.1)
    pub host: String,
    /// Request timeout in seconds
    pub request_timeout: u64,
    /// Connect timeout towards the gateways in seconds
    pub connect_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let site = env::var("ROTATOR_SITE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| RotatorError::MissingEnvVar("ROTATOR_SITE".into()))?;

        let preset = get_env_or("ROTATOR_REGION_PRESET", "default");
        let region_preset = RegionPreset::from_str(&preset).ok_or_else(|| {
            RotatorError::InvalidConfig(format!(
                "ROTATOR_REGION_PRESET must be one of default, extra, all (got {})",
                preset
            ))
        })?;

        Ok(Config {
            rotator: RotatorConfig {
                site: site.trim().to_string(),
                regions: parse_regions(&get_env_or("ROTATOR_REGIONS", "")),
                region_preset,
                verbose: get_env_or("ROTATOR_VERBOSE", "true").parse().unwrap_or(true),
                force: get_env_or("ROTATOR_FORCE", "false").parse().unwrap_or(false),
                manual_deletion: get_env_or("ROTATOR_MANUAL_DELETION", "false")
                    .parse()
                    .unwrap_or(false),
                poll_interval_ms: get_env_or("ROTATOR_POLL_INTERVAL_MS", "2000")
                    .parse()
                    .map_err(|_| {
                        RotatorError::InvalidConfig(
                            "ROTATOR_POLL_INTERVAL_MS must be a number of milliseconds".into(),
                        )
                    })?,
                ready_timeout: get_env_or("ROTATOR_READY_TIMEOUT", "60")
                    .parse()
                    .map_err(|_| {
                        RotatorError::InvalidConfig(
                            "ROTATOR_READY_TIMEOUT must be a number of seconds".into(),
                        )
                    })?,
                endpoint_url: parse_endpoint_url()?,
            },
            server: ServerConfig {
                port: get_env_or("SERVER_PORT", "8000").parse().map_err(|_| {
                    RotatorError::InvalidConfig("SERVER_PORT must be a valid port number".into())
                })?,
                host: get_env_or("SERVER_HOST", "127.0.0.1"),
                request_timeout: get_env_or("SERVER_REQUEST_TIMEOUT", "30")
                    .parse()
                    .unwrap_or(30),
                connect_timeout: get_env_or("SERVER_CONNECT_TIMEOUT", "10")
                    .parse()
                    .unwrap_or(10),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the local listener address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Rotator builder carrying every setting of this configuration
    pub fn rotator_builder(&self) -> IpRotatorBuilder {
        let mut builder = IpRotator::builder(self.rotator.site.clone())
            .verbose(self.rotator.verbose)
            .require_manual_deletion(self.rotator.manual_deletion)
            .provision_config(self.rotator.provision_config())
            .transport_config(self.server.transport_config());

        builder = if self.rotator.regions.is_empty() {
            builder.region_preset(self.rotator.region_preset)
        } else {
            builder.regions(self.rotator.regions.clone())
        };
        if let Some(url) = &self.rotator.endpoint_url {
            builder = builder.endpoint_url(url.clone());
        }
        builder
    }
}

impl ServerConfig {
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            request_timeout: Duration::from_secs(self.request_timeout),
            connect_timeout: Duration::from_secs(self.connect_timeout),
        }
    }
}

impl RotatorConfig {
    pub fn provision_config(&self) -> ProvisionConfig {
        ProvisionConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ready_timeout: Duration::from_secs(self.ready_timeout),
            ..ProvisionConfig::default()
        }
    }
}

fn parse_regions(raw: &str) -> Vec<Region> {
    raw.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(Region::from)
        .collect()
}

fn parse_endpoint_url() -> Result<Option<Url>> {
    let raw = env::var("AWS_ENDPOINT_URL").unwrap_or_default();
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let url = Url::parse(raw).map_err(|e| {
        RotatorError::InvalidConfig(format!("AWS_ENDPOINT_URL must be a valid URL: {}", e))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RotatorError::InvalidConfig(format!(
            "AWS_ENDPOINT_URL has unsupported scheme: {}",
            url.scheme()
        )));
    }
    Ok(Some(url))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::credentials::tests::{EnvGuard, ENV_LOCK};

    const CONFIG_ENV_KEYS: &[&str] = &[
        "ROTATOR_SITE",
        "ROTATOR_REGIONS",
        "ROTATOR_REGION_PRESET",
        "ROTATOR_VERBOSE",
        "ROTATOR_FORCE",
        "ROTATOR_MANUAL_DELETION",
        "ROTATOR_POLL_INTERVAL_MS",
        "ROTATOR_READY_TIMEOUT",
        "AWS_ENDPOINT_URL",
        "SERVER_PORT",
        "SERVER_HOST",
        "SERVER_REQUEST_TIMEOUT",
        "SERVER_CONNECT_TIMEOUT",
        "LOG_LEVEL",
        "LOG_FORMAT",
    ];

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);
        env::set_var("ROTATOR_SITE", "https://example.com");

        let config = Config::from_env().unwrap();

        assert_eq!(config.rotator.site, "https://example.com");
        assert!(config.rotator.regions.is_empty());
        assert_eq!(config.rotator.region_preset, RegionPreset::Default);
        assert!(config.rotator.verbose);
        assert!(!config.rotator.force);
        assert!(!config.rotator.manual_deletion);
        assert_eq!(config.rotator.poll_interval_ms, 2000);
        assert_eq!(config.rotator.ready_timeout, 60);
        assert!(config.rotator.endpoint_url.is_none());

        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.request_timeout, 30);
        assert_eq!(config.server.connect_timeout, 10);
        assert_eq!(config.log.format, "pretty");
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("ROTATOR_SITE", "http://localhost:3000");
        env::set_var("ROTATOR_REGIONS", "us-east-1, eu-west-1,,");
        env::set_var("ROTATOR_REGION_PRESET", "all");
        env::set_var("ROTATOR_VERBOSE", "false");
        env::set_var("ROTATOR_FORCE", "true");
        env::set_var("ROTATOR_POLL_INTERVAL_MS", "250");
        env::set_var("AWS_ENDPOINT_URL", "http://localhost:4566");
        env::set_var("SERVER_PORT", "9000");
        env::set_var("SERVER_REQUEST_TIMEOUT", "120");
        env::set_var("SERVER_CONNECT_TIMEOUT", "3");

        let config = Config::from_env().unwrap();

        assert_eq!(
            config.rotator.regions,
            vec![Region::from("us-east-1"), Region::from("eu-west-1")]
        );
        assert_eq!(config.rotator.region_preset, RegionPreset::All);
        assert!(!config.rotator.verbose);
        assert!(config.rotator.force);
        assert_eq!(
            config.rotator.provision_config().poll_interval,
            Duration::from_millis(250)
        );
        assert_eq!(
            config.rotator.endpoint_url.as_ref().map(Url::as_str),
            Some("http://localhost:4566/")
        );
        assert_eq!(config.server_addr(), "127.0.0.1:9000");

        let transport = config.server.transport_config();
        assert_eq!(transport.request_timeout, Duration::from_secs(120));
        assert_eq!(transport.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_config_from_env_requires_site() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, RotatorError::MissingEnvVar(_)));
    }

    #[test]
    fn test_config_from_env_invalid_values() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);
        env::set_var("ROTATOR_SITE", "https://example.com");

        env::set_var("SERVER_PORT", "not-a-port");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            RotatorError::InvalidConfig(_)
        ));
        env::remove_var("SERVER_PORT");

        env::set_var("ROTATOR_REGION_PRESET", "everywhere");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            RotatorError::InvalidConfig(_)
        ));
        env::remove_var("ROTATOR_REGION_PRESET");

        env::set_var("AWS_ENDPOINT_URL", "ftp://localhost");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            RotatorError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_rotator_builder_from_config() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);
        env::set_var("ROTATOR_SITE", "https://example.com");
        env::set_var("ROTATOR_REGIONS", "us-east-1,us-west-2");

        let config = Config::from_env().unwrap();
        let rotator = config
            .rotator_builder()
            .gateway_api(std::sync::Arc::new(crate::gateway::MemoryGatewayApi::new()))
            .build()
            .unwrap();

        assert_eq!(
            rotator.regions(),
            &[Region::from("us-east-1"), Region::from("us-west-2")]
        );
    }
}
