//! Driver configuration with builder pattern.

use std::time::Duration;

use snafu::ensure;

use crate::error::{ConfigSnafu, Result};

/// Default maximum number of client handles a pool will admit.
const DEFAULT_MAX_POOL_SIZE: u32 = 100;

/// Default connection establishment timeout (5 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between discovery rounds (10 seconds).
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default jitter fraction applied to the heartbeat interval.
const DEFAULT_HEARTBEAT_JITTER: f64 = 0.1;

/// Configuration for the VellumDB driver's pool and monitor.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use vellum_driver::DriverConfig;
///
/// let config = DriverConfig::builder()
///     .with_max_pool_size(16)
///     .with_wait_timeout(Duration::from_millis(500))
///     .build()
///     .expect("valid config");
/// ```
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Upper bound on simultaneously checked-out plus idle handles.
    pub(crate) max_pool_size: u32,

    /// How long `pop()` waits for a handle before reporting
    /// exhaustion. `None` blocks indefinitely: admission control
    /// takes precedence over liveness.
    pub(crate) wait_timeout: Option<Duration>,

    /// Connection establishment timeout for lazy dials.
    pub(crate) connect_timeout: Duration,

    /// Expected cluster name, recorded in the initial snapshot.
    pub(crate) cluster_name: Option<String>,

    /// Background monitor settings.
    pub(crate) monitor: MonitorConfig,
}

impl DriverConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> DriverConfigBuilder {
        DriverConfigBuilder::default()
    }

    /// Returns the maximum pool size.
    #[must_use]
    pub fn max_pool_size(&self) -> u32 {
        self.max_pool_size
    }

    /// Returns the checkout wait timeout, if one is configured.
    #[must_use]
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout
    }

    /// Returns the connection establishment timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the expected cluster name.
    #[must_use]
    pub fn cluster_name(&self) -> Option<&str> {
        self.cluster_name.as_deref()
    }

    /// Returns the monitor settings.
    #[must_use]
    pub fn monitor(&self) -> &MonitorConfig {
        &self.monitor
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            wait_timeout: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            cluster_name: None,
            monitor: MonitorConfig::default(),
        }
    }
}

/// Builder for [`DriverConfig`].
#[derive(Debug, Default)]
pub struct DriverConfigBuilder {
    max_pool_size: Option<u32>,
    wait_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    cluster_name: Option<String>,
    monitor: Option<MonitorConfig>,
}

impl DriverConfigBuilder {
    /// Sets the maximum pool size. Must be at least 1.
    #[must_use]
    pub fn with_max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = Some(size);
        self
    }

    /// Sets how long `pop()` waits before reporting exhaustion.
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Sets the connection establishment timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the expected cluster name.
    #[must_use]
    pub fn with_cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = Some(name.into());
        self
    }

    /// Sets the background monitor settings.
    #[must_use]
    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Config`](crate::DriverError::Config) if
    /// `max_pool_size` is 0 or the wait timeout is zero.
    pub fn build(self) -> Result<DriverConfig> {
        let defaults = DriverConfig::default();
        let config = DriverConfig {
            max_pool_size: self.max_pool_size.unwrap_or(defaults.max_pool_size),
            wait_timeout: self.wait_timeout,
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            cluster_name: self.cluster_name,
            monitor: self.monitor.unwrap_or(defaults.monitor),
        };

        ensure!(
            config.max_pool_size >= 1,
            ConfigSnafu { message: "max_pool_size must be at least 1" }
        );
        if let Some(timeout) = config.wait_timeout {
            ensure!(
                !timeout.is_zero(),
                ConfigSnafu { message: "wait_timeout must be non-zero; omit it to block forever" }
            );
        }
        config.monitor.validate()?;

        Ok(config)
    }
}

/// Settings for the background topology monitor.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use vellum_driver::MonitorConfig;
///
/// let monitor = MonitorConfig::new()
///     .with_heartbeat_interval(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often the monitor runs a discovery round.
    heartbeat_interval: Duration,

    /// Fraction of the interval randomized away per round, in
    /// `[0.0, 1.0)`. Keeps a fleet of drivers from heartbeating in
    /// lockstep.
    jitter: f64,
}

impl MonitorConfig {
    /// Creates monitor settings with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the interval between discovery rounds.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the jitter fraction, in `[0.0, 1.0)`.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the interval between discovery rounds.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Returns the jitter fraction.
    #[must_use]
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            !self.heartbeat_interval.is_zero(),
            ConfigSnafu { message: "heartbeat_interval must be non-zero" }
        );
        ensure!(
            (0.0..1.0).contains(&self.jitter),
            ConfigSnafu { message: "jitter must be in [0.0, 1.0)" }
        );
        Ok(())
    }

    /// Replaces out-of-range settings with defaults. The monitor runs
    /// on this, so a config handed straight to `TopologyMonitor::start`
    /// (bypassing `DriverConfigBuilder::build`) can neither panic the
    /// monitor thread nor busy-loop it.
    pub(crate) fn normalized(mut self) -> Self {
        if self.heartbeat_interval.is_zero() {
            self.heartbeat_interval = DEFAULT_HEARTBEAT_INTERVAL;
        }
        if !(0.0..1.0).contains(&self.jitter) {
            self.jitter = DEFAULT_HEARTBEAT_JITTER;
        }
        self
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL, jitter: DEFAULT_HEARTBEAT_JITTER }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DriverConfig::builder().build().expect("defaults build");
        assert_eq!(config.max_pool_size(), DEFAULT_MAX_POOL_SIZE);
        assert!(config.wait_timeout().is_none());
        assert_eq!(config.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn zero_pool_size_rejected() {
        let err = DriverConfig::builder().with_max_pool_size(0).build();
        assert!(err.is_err());
    }

    #[test]
    fn zero_wait_timeout_rejected() {
        let err = DriverConfig::builder().with_wait_timeout(Duration::ZERO).build();
        assert!(err.is_err());
    }

    #[test]
    fn monitor_jitter_bounds() {
        let monitor = MonitorConfig::new().with_jitter(1.5);
        let err = DriverConfig::builder().with_monitor(monitor).build();
        assert!(err.is_err());
    }

    #[test]
    fn normalized_clamps_out_of_range_monitor_settings() {
        let monitor =
            MonitorConfig::new().with_heartbeat_interval(Duration::ZERO).with_jitter(1.5);
        let normalized = monitor.normalized();
        assert_eq!(normalized.heartbeat_interval(), DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(normalized.jitter(), DEFAULT_HEARTBEAT_JITTER);

        // In-range settings pass through untouched.
        let monitor =
            MonitorConfig::new().with_heartbeat_interval(Duration::from_secs(3)).with_jitter(0.2);
        let normalized = monitor.normalized();
        assert_eq!(normalized.heartbeat_interval(), Duration::from_secs(3));
        assert_eq!(normalized.jitter(), 0.2);
    }

    #[test]
    fn builder_overrides_stick() {
        let config = DriverConfig::builder()
            .with_max_pool_size(3)
            .with_wait_timeout(Duration::from_millis(250))
            .with_cluster_name("prod-east")
            .build()
            .expect("valid config");
        assert_eq!(config.max_pool_size(), 3);
        assert_eq!(config.wait_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.cluster_name(), Some("prod-east"));
    }
}
