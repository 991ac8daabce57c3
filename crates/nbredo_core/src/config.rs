//! Redo session configuration.

/// Configuration for a recovery or replica replay session.
#[derive(Debug, Clone)]
pub struct RedoConfig {
    /// Whether read-only queries may run while replaying (hot standby).
    ///
    /// Enables standby conflict resolution and the vacuum unpin barrier.
    pub hot_standby: bool,

    /// Database whose backends are counted for conflict fast paths.
    pub database_id: u32,

    /// Emit a `debug` event with the rendered description of every record.
    pub trace_records: bool,

    /// Verify page checksums when reading pages from the page store.
    pub verify_checksums: bool,
}

impl Default for RedoConfig {
    fn default() -> Self {
        Self {
            hot_standby: false,
            database_id: 0,
            trace_records: false,
            verify_checksums: true,
        }
    }
}

impl RedoConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether standby queries run concurrently with replay.
    #[must_use]
    pub const fn hot_standby(mut self, value: bool) -> Self {
        self.hot_standby = value;
        self
    }

    /// Sets the database id used for backend counting.
    #[must_use]
    pub const fn database_id(mut self, value: u32) -> Self {
        self.database_id = value;
        self
    }

    /// Sets per-record tracing.
    #[must_use]
    pub const fn trace_records(mut self, value: bool) -> Self {
        self.trace_records = value;
        self
    }

    /// Sets checksum verification on page reads.
    #[must_use]
    pub const fn verify_checksums(mut self, value: bool) -> Self {
        self.verify_checksums = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RedoConfig::default();
        assert!(!config.hot_standby);
        assert!(config.verify_checksums);
        assert!(!config.trace_records);
    }

    #[test]
    fn builder_pattern() {
        let config = RedoConfig::new()
            .hot_standby(true)
            .database_id(16384)
            .verify_checksums(false);

        assert!(config.hot_standby);
        assert_eq!(config.database_id, 16384);
        assert!(!config.verify_checksums);
    }
}
