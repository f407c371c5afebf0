use serde::{Deserialize, Serialize};

/// Admission-control ceilings for the model backend.
///
/// Four independent sliding windows: requests and tokens, per minute and
/// per day.  Defaults are conservative fractions of the backend's
/// published free-tier limits so a second consumer of the same key has
/// headroom left.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaConfig {
    #[serde(default = "d_rpm")]
    pub requests_per_minute: u64,
    #[serde(default = "d_rpd")]
    pub requests_per_day: u64,
    #[serde(default = "d_tpm")]
    pub tokens_per_minute: u64,
    #[serde(default = "d_tpd")]
    pub tokens_per_day: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: d_rpm(),
            requests_per_day: d_rpd(),
            tokens_per_minute: d_tpm(),
            tokens_per_day: d_tpd(),
        }
    }
}

fn d_rpm() -> u64 {
    12
}
fn d_rpd() -> u64 {
    400
}
fn d_tpm() -> u64 {
    8_000
}
fn d_tpd() -> u64 {
    70_000
}
