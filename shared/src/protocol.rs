/// API path prefix
pub const API_PREFIX: &str = "/v1";

/// Default measurement provider endpoint
pub const DEFAULT_PROVIDER_URL: &str = "https://api.globalping.io";

/// Path of the measurement creation endpoint on the provider
pub const MEASUREMENTS_PATH: &str = "/v1/measurements";

/// Probes requested per location in a single measurement
pub const PROBES_PER_LOCATION: u32 = 1;

/// Trailing window used for the availability percentage
pub const UPTIME_WINDOW_HOURS: i64 = 24;

/// Number of history rows returned for charting
pub const HISTORY_CHART_LIMIT: usize = 30;
