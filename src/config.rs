use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub webhook: WebhookConfig,
    pub scheduler: SchedulerConfig,
    pub sender: SenderConfig,
    pub dlq: DlqConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Mirrors the DynamoDB-backed deployment's table name (§6.1). Not
/// load-bearing locally (the table is always `events`/`users`), but carried
/// through and logged so the two deployments read the same configuration
/// surface.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub users_table: String,
}

/// Mirrors the SQS-backed deployment's queue configuration (§6.4). Not
/// load-bearing locally; carried through for parity with the cloud
/// deployment this schema was designed alongside.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub greeter_queue_name: String,
    pub dlq_queue_name: String,
    pub aws_endpoint_url: Option<String>,
    pub aws_region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub hookbin_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub sweep_interval_seconds: u64,
    /// Fixed at 100 per the store gateway's page-size ceiling; not
    /// env-overridable.
    pub page_size: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SenderConfig {
    pub worker_count: u32,
    pub poll_interval_seconds: u64,
    /// `STUCK_TIMEOUT_SENDER`, fixed at 300s; not env-overridable.
    pub stuck_timeout_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DlqConfig {
    pub probe_interval_seconds: u64,
    /// Fixed at 10 per the DLQ processor's batch contract; not
    /// env-overridable.
    pub batch_size: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub check_interval_seconds: u64,
    /// `STUCK_TIMEOUT_MONITOR`, fixed at 600s; not env-overridable.
    pub stuck_timeout_seconds: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://greeter.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            store: StoreConfig {
                users_table: env::var("USERS_TABLE").unwrap_or_else(|_| "users".to_string()),
            },
            queue: QueueConfig {
                greeter_queue_name: env::var("GREETER_QUEUE_NAME")
                    .unwrap_or_else(|_| "greeter-queue".to_string()),
                dlq_queue_name: env::var("GREETER_DLQ_NAME")
                    .unwrap_or_else(|_| "greeter-dlq".to_string()),
                aws_endpoint_url: env::var("AWS_ENDPOINT_URL").ok(),
                aws_region: env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            },
            webhook: WebhookConfig {
                hookbin_url: env::var("HOOKBIN_URL")
                    .map_err(|_| ConfigError::MissingEnv("HOOKBIN_URL".to_string()))?,
                timeout_seconds: env::var("WEBHOOK_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            },
            scheduler: SchedulerConfig {
                sweep_interval_seconds: env::var("SCHEDULER_SWEEP_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60),
                page_size: 100,
            },
            sender: SenderConfig {
                worker_count: env::var("SENDER_WORKER_COUNT")
                    .unwrap_or_else(|_| "4".to_string())
                    .parse()
                    .unwrap_or(4),
                poll_interval_seconds: env::var("SENDER_POLL_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                stuck_timeout_seconds: 300,
            },
            dlq: DlqConfig {
                probe_interval_seconds: env::var("DLQ_PROBE_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "120".to_string())
                    .parse()
                    .unwrap_or(120),
                batch_size: 10,
            },
            monitor: MonitorConfig {
                check_interval_seconds: env::var("MONITOR_CHECK_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60),
                stuck_timeout_seconds: 600,
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://greeter.db".to_string(),
                max_connections: 5,
            },
            store: StoreConfig {
                users_table: "users".to_string(),
            },
            queue: QueueConfig {
                greeter_queue_name: "greeter-queue".to_string(),
                dlq_queue_name: "greeter-dlq".to_string(),
                aws_endpoint_url: None,
                aws_region: "us-east-1".to_string(),
            },
            webhook: WebhookConfig {
                hookbin_url: "http://localhost:9000/hook".to_string(),
                timeout_seconds: 30,
            },
            scheduler: SchedulerConfig {
                sweep_interval_seconds: 60,
                page_size: 100,
            },
            sender: SenderConfig {
                worker_count: 4,
                poll_interval_seconds: 5,
                stuck_timeout_seconds: 300,
            },
            dlq: DlqConfig {
                probe_interval_seconds: 120,
                batch_size: 10,
            },
            monitor: MonitorConfig {
                check_interval_seconds: 60,
                stuck_timeout_seconds: 600,
            },
        }
    }
}
