use serde::{Deserialize, Serialize};

/// Authentication configuration for the wire-protocol front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Default authentication plugin offered in the initial handshake.
    /// Clients that request a different plugin get an auth-switch request.
    #[serde(default = "default_auth_plugin")]
    pub default_plugin: String,
    /// Server version string advertised in the handshake.
    #[serde(default = "default_server_version")]
    pub server_version: String,
}

fn default_auth_plugin() -> String {
    "mysql_native_password".into()
}

fn default_server_version() -> String {
    "5.7.22-ShardBridge".into()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            default_plugin: default_auth_plugin(),
            server_version: default_server_version(),
        }
    }
}

/// Configuration for one transaction recovery job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryJobConfig {
    /// Job identity. Passes are serialized per name; distinct names may
    /// run concurrently.
    pub job_name: String,
    /// Cron expression driving the pass trigger (seconds-resolution,
    /// e.g. `"0 */2 * * * *"` for every two minutes).
    pub cron_expression: String,
    /// Failed attempts allowed per operation before it is escalated to
    /// `Exhausted` (default: 3).
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Per-operation compensation timeout in milliseconds. A timed-out
    /// attempt leaves the operation `Failed` for the next pass.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Max log entries processed per pass (0 = unlimited).
    #[serde(default)]
    pub batch_size: usize,
}

fn default_retry_limit() -> u32 {
    3
}

fn default_operation_timeout_ms() -> u64 {
    5_000
}

impl Default for RecoveryJobConfig {
    fn default() -> Self {
        Self {
            job_name: "txn-recovery".into(),
            cron_expression: "0 * * * * *".into(),
            retry_limit: default_retry_limit(),
            operation_timeout_ms: default_operation_timeout_ms(),
            batch_size: 0,
        }
    }
}
