// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

pub const DEFAULT_PORT: u16 = 7214;

/// Environment variables override file values, e.g.
/// `PROCSOCK__NETWORK__PORT=9000`.
pub const ENV_PREFIX: &str = "PROCSOCK";

/// Payload encoding of the processing envelopes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    Json,
    #[default]
    Ejson,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    pub backlog: u32,
    pub nodelay: bool,
    pub max_connection: usize,
    pub max_package_size: usize,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Upper bound for one whole exchange on the server side.
    pub connection_timeout_ms: u64,
    pub format: PayloadEncoding,
    pub compress: bool,
    pub compression_level: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            backlog: 5,
            nodelay: true,
            max_connection: 128,
            max_package_size: 256 * 1024 * 1024,
            read_timeout_ms: 30_000,
            write_timeout_ms: 30_000,
            connection_timeout_ms: 120_000,
            format: PayloadEncoding::Ejson,
            compress: false,
            compression_level: 6,
        }
    }
}

impl NetworkConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        millis(self.write_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Option<Duration> {
        millis(self.connection_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub nodelay: bool,
    pub max_package_size: usize,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            nodelay: true,
            max_package_size: 256 * 1024 * 1024,
            connect_timeout_ms: 10_000,
            read_timeout_ms: 30_000,
            write_timeout_ms: 30_000,
        }
    }
}

impl ClientConfig {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives, used unless `RUST_LOG` is set.
    pub filter: String,
    /// Directory for an hourly rolling log file, stdout only when unset.
    pub dir: Option<String>,
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "info".to_string(),
            dir: None,
            file_prefix: "procsock.log".to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub client: ClientConfig,
    pub log: LogConfig,
}

impl AppConfig {
    /// Layers the built-in defaults, the file at `path` (if it exists) and
    /// `PROCSOCK__*` environment variables.
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<AppConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name(path_str).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.network.max_connection == 0 {
            return Err(AppError::InvalidValue(
                "network.max_connection must be at least 1".into(),
            ));
        }
        if self.network.compression_level > 9 {
            return Err(AppError::InvalidValue(format!(
                "network.compression_level {} is not in 0..=9",
                self.network.compression_level
            )));
        }
        Ok(())
    }
}

/// 0 disables a deadline.
fn millis(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_millis(value))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::set_up_config(dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.network.port, DEFAULT_PORT);
        assert_eq!(config.network.backlog, 5);
        assert_eq!(config.network.format, PayloadEncoding::Ejson);
        assert!(config.network.nodelay);
        assert_eq!(config.client.server_address(), "127.0.0.1:7214");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[network]
port = 9100
format = "json"
compress = true
read_timeout_ms = 0

[client]
host = "10.0.0.2"
port = 9100

[log]
filter = "procsock=debug"
"#
        )
        .unwrap();

        let config = AppConfig::set_up_config(file.path()).unwrap();
        assert_eq!(config.network.port, 9100);
        assert_eq!(config.network.format, PayloadEncoding::Json);
        assert!(config.network.compress);
        assert_eq!(config.network.read_timeout(), None);
        assert_eq!(
            config.network.write_timeout(),
            Some(Duration::from_millis(30_000))
        );
        assert_eq!(config.network.max_connection, 128);
        assert_eq!(config.client.server_address(), "10.0.0.2:9100");
        assert_eq!(config.log.filter, "procsock=debug");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[network]\ncompression_level = 12").unwrap();
        assert!(matches!(
            AppConfig::set_up_config(file.path()),
            Err(AppError::InvalidValue(_))
        ));
    }
}
