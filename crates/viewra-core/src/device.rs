//! Device capability types

use crate::params::Resolution;
use serde::{Deserialize, Serialize};

/// Coarse browser/client classification derived from the user agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserFamily {
    /// Safari and other Apple WebKit clients; want HLS
    Safari,
    /// Modern browsers and smart-TV runtimes; want DASH
    Modern,
    /// Everything else; want progressive mp4
    Legacy,
}

/// Capabilities of the requesting playback device
///
/// Missing fields default to conservative assumptions: H.264/AAC, 1080p,
/// 5 Mbps, no HDR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    #[serde(default)]
    pub user_agent: String,
    #[serde(default = "default_supported_codecs")]
    pub supported_codecs: Vec<String>,
    #[serde(default = "default_max_resolution")]
    pub max_resolution: Resolution,
    /// Maximum sustainable bitrate in bits per second
    #[serde(default = "default_max_bitrate")]
    pub max_bitrate_bps: u64,
    #[serde(default)]
    pub supports_hdr: bool,
    #[serde(default)]
    pub client_ip: Option<String>,
}

fn default_supported_codecs() -> Vec<String> {
    vec!["h264".to_string(), "aac".to_string()]
}

fn default_max_resolution() -> Resolution {
    Resolution::P1080
}

fn default_max_bitrate() -> u64 {
    5_000_000
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            user_agent: String::new(),
            supported_codecs: default_supported_codecs(),
            max_resolution: default_max_resolution(),
            max_bitrate_bps: default_max_bitrate(),
            supports_hdr: false,
            client_ip: None,
        }
    }
}

impl DeviceProfile {
    /// Case-insensitive codec support check
    pub fn supports_codec(&self, codec: &str) -> bool {
        self.supported_codecs
            .iter()
            .any(|c| c.eq_ignore_ascii_case(codec))
    }

    /// Classify the client from its user agent
    pub fn browser_family(&self) -> BrowserFamily {
        let ua = self.user_agent.to_ascii_lowercase();
        if ua.is_empty() {
            return BrowserFamily::Legacy;
        }
        // Chrome and Edge embed "safari" in their UA; check them first
        if ua.contains("chrome") || ua.contains("chromium") || ua.contains("crios") {
            return BrowserFamily::Modern;
        }
        if ua.contains("edg/") || ua.contains("edge") {
            return BrowserFamily::Modern;
        }
        if ua.contains("safari") || ua.contains("applewebkit") && ua.contains("mobile") {
            return BrowserFamily::Safari;
        }
        if ua.contains("firefox") {
            return BrowserFamily::Modern;
        }
        if ua.contains("smarttv")
            || ua.contains("smart-tv")
            || ua.contains("tizen")
            || ua.contains("webos")
            || ua.contains("android tv")
            || ua.contains("shield")
        {
            return BrowserFamily::Modern;
        }
        BrowserFamily::Legacy
    }
}
