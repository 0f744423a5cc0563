use std::time::Duration;

use clap::{builder::BoolishValueParser, ArgAction, Parser, ValueEnum};
use kinv_kubehub::ClientOptions;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum LogFormatter {
    Json,
    Text,
}

#[derive(Parser, Debug)]
#[command(name = "kinv-agent", version, about = "Kubernetes inventory agent")]
pub struct Config {
    /// Tracing filter directive, e.g. `info` or `kinv_collect=debug,info`
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMATTER", value_enum, default_value_t = LogFormatter::Json)]
    pub log_formatter: LogFormatter,

    /// Time between collection cycles (`30m`, `1h`)
    #[arg(long, env = "COLLECT_INTERVAL", default_value = "1h")]
    pub collect_interval: String,

    #[arg(long, env = "UPLOAD_INVENTORY", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub upload_inventory: bool,

    /// User to impersonate for cluster API calls
    #[arg(long, env = "IMPERSONATE")]
    pub impersonate: Option<String>,

    /// Inventory server base URL
    #[arg(long, env = "SERVER_API_ENDPOINT", default_value = "http://localhost:8086")]
    pub server_api_endpoint: String,

    #[arg(long, env = "HTTP_PORT", default_value_t = 8087)]
    pub http_port: u16,

    #[arg(long, env = "TLS_CRT", default_value = "/etc/certificates/tls.crt")]
    pub tls_crt: String,

    #[arg(long, env = "TLS_KEY", default_value = "/etc/certificates/tls.key")]
    pub tls_key: String,

    #[arg(long, env = "AUTH_ENABLED", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub auth_enabled: bool,

    /// Bound on each cluster API call
    #[arg(long, env = "API_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub api_timeout: Duration,

    #[arg(long, env = "DELIVERY_TIMEOUT", default_value = "60s", value_parser = humantime::parse_duration)]
    pub delivery_timeout: Duration,
}

impl Config {
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            impersonate: self.impersonate.clone().filter(|s| !s.is_empty()),
            read_timeout: self.api_timeout,
            ..ClientOptions::default()
        }
    }
}
