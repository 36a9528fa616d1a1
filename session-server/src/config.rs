//! Server configuration.
//!
//! All settings live in a single [`ServerConfig`] read once at start-up from
//! `ServerConfig.json` next to the binary. A missing file means built-in
//! defaults; a present but broken file is reported and refuses start-up.

use std::time::Duration;

use serde::Deserialize;

/// The configuration file the server looks for at start-up.
pub const CONFIG_FILE: &str = "ServerConfig.json";

/// Process-wide server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub ip: String,
    /// Port to listen on.
    pub port: u16,
    /// Idle-session expiry and admission wait cap, in seconds.
    pub game_timeout: u64,
    /// Per-request body cap in bytes, reported to clients when they join.
    pub request_size_max: usize,
    /// Socket read chunk in bytes.
    pub buffer_size: usize,
    /// Per-connection read/write deadline, in seconds.
    pub connection_timeout: u64,
    /// Log level toggles, see [`LogConfig`].
    pub log: LogConfig,
}

/// Which parts of the server get to log. The server-info log prints detailed
/// information about every single connection and is only useful for
/// debugging TCP connections.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub server_info: bool,
    pub server_errors: bool,
    pub framework_info: bool,
    pub framework_requests: bool,
    pub framework_responses: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            ip: "127.0.0.1".to_owned(),
            port: 4711,
            game_timeout: 30,
            request_size_max: 1_000_000,
            buffer_size: 4096,
            connection_timeout: 10,
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            server_info: false,
            server_errors: true,
            framework_info: true,
            framework_requests: true,
            framework_responses: true,
        }
    }
}

impl ServerConfig {
    /// Idle-session expiry as a [`Duration`].
    pub fn game_timeout(&self) -> Duration {
        Duration::from_secs(self.game_timeout)
    }

    /// Per-connection read/write deadline as a [`Duration`].
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    /// Builds the tracing filter directives matching the log toggles. The
    /// toggles map onto the event targets `server`, `framework`,
    /// `framework::request` and `framework::response`; `RUST_LOG` overrides
    /// the whole set when present.
    pub fn log_filter(&self) -> String {
        let log = &self.log;
        let server = if log.server_info {
            "server=debug"
        } else if log.server_errors {
            "server=error"
        } else {
            "server=off"
        };
        let framework = if log.framework_info {
            "framework=info"
        } else {
            "framework=off"
        };
        let request = if log.framework_requests {
            "framework::request=debug"
        } else {
            "framework::request=off"
        };
        let response = if log.framework_responses {
            "framework::response=debug"
        } else {
            "framework::response=off"
        };
        format!("warn,{server},{framework},{request},{response}")
    }
}

/// Reads the configuration file. Returns the defaults if no file exists.
pub async fn load_config() -> Result<ServerConfig, String> {
    let json_content = match tokio::fs::read_to_string(CONFIG_FILE).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ServerConfig::default());
        }
        Err(e) => return Err(format!("Failed to read {}: {}", CONFIG_FILE, e)),
    };
    serde_json::from_str(&json_content).map_err(|e| format!("Failed to parse {}: {}", CONFIG_FILE, e))
}
