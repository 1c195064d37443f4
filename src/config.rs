/// Server-wide tunables for the reservation core.
///
/// The embedding server builds one of these at startup and hands it to
/// [`ServerState`](crate::server::ServerState). All reservation operations
/// read their ambient policy from here rather than from globals.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Fallback delay, in seconds, added to the soonest occurrence start
    /// when the midpoint retry time for a degraded reservation is invalid.
    pub retry_delay_secs: i64,

    /// Partition recorded on a confirmation whose extension carries no
    /// explicit partition name.
    pub default_partition: String,

    /// Reservation IDs starting with this character denote the maintenance
    /// reservation; its confirmation triggers conflict eviction.
    pub maintenance_prefix: char,

    /// When true, jobs in moved/finished/expired states are retained in the
    /// queue for history and must not count toward idleness.
    pub job_history_enabled: bool,

    /// Hostname reported as the requestor in denial audit records.
    pub server_host: String,

    /// Daemon name reported as the requestor in denial audit records.
    pub daemon_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: 10,
            default_partition: "default".to_string(),
            maintenance_prefix: 'M',
            job_history_enabled: false,
            server_host: "localhost".to_string(),
            daemon_name: "reservd".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_delay(mut self, secs: i64) -> Self {
        self.retry_delay_secs = secs;
        self
    }

    pub fn with_history(mut self, enabled: bool) -> Self {
        self.job_history_enabled = enabled;
        self
    }

    pub fn with_default_partition(mut self, partition: impl Into<String>) -> Self {
        self.default_partition = partition.into();
        self
    }
}
