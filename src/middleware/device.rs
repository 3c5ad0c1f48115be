//! User-agent classification for tracked events.
//!
//! Checks are ordered and the first match wins, so some agents land in
//! surprising buckets (iPhone agents contain "Mac" and report `MacOS`;
//! Android agents contain "Linux" and report `Linux`). Stored logs and the
//! dashboards built on them rely on these exact labels.

use once_cell::sync::Lazy;
use regex::Regex;

static TABLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)tablet|ipad|playbook|silk").unwrap());

static MOBILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Mobile|Android|iP(hone|od)|IEMobile|BlackBerry|Kindle|Silk-Accelerated|(hpw|web)OS|Opera M(obi|ini)",
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_type: &'static str,
    pub os: &'static str,
    pub browser: &'static str,
}

impl DeviceInfo {
    pub fn parse(ua: &str) -> Self {
        Self {
            device_type: device_type(ua),
            os: os(ua),
            browser: browser(ua),
        }
    }
}

/// An "android" occurrence with no "mobi" anywhere after it.
fn is_android_tablet(ua: &str) -> bool {
    let lower = ua.to_ascii_lowercase();
    match lower.rfind("android") {
        Some(pos) => !lower[pos..].contains("mobi"),
        None => false,
    }
}

pub fn device_type(ua: &str) -> &'static str {
    if ua.is_empty() {
        return "unknown";
    }
    if TABLET.is_match(ua) || is_android_tablet(ua) {
        return "tablet";
    }
    if MOBILE.is_match(ua) {
        return "mobile";
    }
    "desktop"
}

pub fn os(ua: &str) -> &'static str {
    if ua.is_empty() {
        return "unknown";
    }
    if ua.contains("Win") {
        "Windows"
    } else if ua.contains("Mac") {
        "MacOS"
    } else if ua.contains("Linux") {
        "Linux"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("like Mac") {
        "iOS"
    } else {
        "Other"
    }
}

pub fn browser(ua: &str) -> &'static str {
    if ua.is_empty() {
        return "unknown";
    }
    if ua.contains("Chrome") && !ua.contains("Edg") && !ua.contains("OPR") {
        "Chrome"
    } else if ua.contains("Safari") && !ua.contains("Chrome") {
        "Safari"
    } else if ua.contains("Firefox") {
        "Firefox"
    } else if ua.contains("Edg") {
        "Edge"
    } else if ua.contains("OPR") || ua.contains("Opera") {
        "Opera"
    } else {
        "Other"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const ANDROID_PHONE: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Mobile Safari/537.36";
    const ANDROID_TABLET: &str = "Mozilla/5.0 (Linux; Android 13; SM-X200) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
    const IPAD: &str = "Mozilla/5.0 (iPad; CPU OS 16_0 like Mac OS X) AppleWebKit/605.1.15 Version/16.0 Safari/604.1";
    const WIN_EDGE: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36 Edg/120.0";
    const MAC_FIREFOX: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.0; rv:121.0) Gecko/20100101 Firefox/121.0";
    const LINUX_OPERA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36 OPR/105.0";

    #[test]
    fn test_device_types() {
        assert_eq!(device_type(IPHONE), "mobile");
        assert_eq!(device_type(ANDROID_PHONE), "mobile");
        assert_eq!(device_type(ANDROID_TABLET), "tablet");
        assert_eq!(device_type(IPAD), "tablet");
        assert_eq!(device_type(WIN_EDGE), "desktop");
        assert_eq!(device_type(""), "unknown");
    }

    #[test]
    fn test_os_first_match_wins() {
        assert_eq!(os(WIN_EDGE), "Windows");
        assert_eq!(os(MAC_FIREFOX), "MacOS");
        // "like Mac OS X" contains "Mac" before the iOS check runs
        assert_eq!(os(IPHONE), "MacOS");
        // Android agents carry "Linux" first
        assert_eq!(os(ANDROID_PHONE), "Linux");
        assert_eq!(os("curl/8.0"), "Other");
        assert_eq!(os(""), "unknown");
    }

    #[test]
    fn test_browsers() {
        assert_eq!(browser(ANDROID_PHONE), "Chrome");
        assert_eq!(browser(IPHONE), "Safari");
        assert_eq!(browser(MAC_FIREFOX), "Firefox");
        assert_eq!(browser(WIN_EDGE), "Edge");
        assert_eq!(browser(LINUX_OPERA), "Opera");
        assert_eq!(browser("curl/8.0"), "Other");
    }

    #[test]
    fn test_parse_bundles_all_three() {
        let info = DeviceInfo::parse(IPAD);
        assert_eq!(info.device_type, "tablet");
        assert_eq!(info.browser, "Safari");
    }
}
