use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

pub type ServiceId = i64;
pub type OwnerId = i64;

/// Kind of measurement requested from the provider for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Ping,
    Http,
    Dns,
    Traceroute,
    Mtr,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::Ping => "ping",
            CheckType::Http => "http",
            CheckType::Dns => "dns",
            CheckType::Traceroute => "traceroute",
            CheckType::Mtr => "mtr",
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ping" => Ok(CheckType::Ping),
            "http" => Ok(CheckType::Http),
            "dns" => Ok(CheckType::Dns),
            "traceroute" => Ok(CheckType::Traceroute),
            "mtr" => Ok(CheckType::Mtr),
            other => Err(format!("unknown check type: {}", other)),
        }
    }
}

/// Current verdict for a service. `Pending` until the first measured check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    Pending,
    Up,
    Down,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Pending => "Pending",
            ServiceStatus::Up => "Up",
            ServiceStatus::Down => "Down",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(ServiceStatus::Pending),
            "Up" => Ok(ServiceStatus::Up),
            "Down" => Ok(ServiceStatus::Down),
            other => Err(format!("unknown service status: {}", other)),
        }
    }
}

/// Selector narrowing where a probe originates, e.g. `country = "DE"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeLocation {
    /// Selector kind understood by the provider ("country", "continent", "asn", ...)
    #[serde(rename = "type")]
    pub selector_type: String,

    /// Selector value, e.g. "DE"
    pub value: String,
}

/// A monitored target.
/// Configuration fields are owned by the API layer; status fields are written
/// only by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub owner_id: OwnerId,
    pub name: String,

    #[serde(rename = "type")]
    pub check_type: CheckType,

    /// Hostname, address or URL handed to the provider
    pub target: String,

    /// Seconds between checks, always > 0
    pub interval_secs: u64,

    pub status: ServiceStatus,
    pub last_checked: Option<DateTime<Utc>>,

    /// Mean latency of the successful probes in the last check, in milliseconds
    pub last_response_time: Option<u64>,

    /// Share of up checks over the trailing 24 hours
    pub uptime_percentage: Option<f64>,

    pub locations: Vec<ProbeLocation>,
}

impl Service {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Configuration accepted when creating or editing a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub check_type: CheckType,
    pub target: String,
    pub interval_secs: u64,
    #[serde(default)]
    pub locations: Vec<ProbeLocation>,
}

impl ServiceConfig {
    /// Returns a description of the first invalid field, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.target.trim().is_empty() {
            return Err("target must not be empty".to_string());
        }
        if self.interval_secs == 0 {
            return Err("interval_secs must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewService {
    pub owner_id: OwnerId,
    #[serde(flatten)]
    pub config: ServiceConfig,
}

/// One persisted check result. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub service_id: ServiceId,
    pub timestamp: DateTime<Utc>,
    pub up: bool,
    pub response_time: u64,
}
