//! Human-readable description of a `User-Agent` header, stored with each
//! session so users can recognize their devices.

use regex::Regex;
use std::sync::LazyLock;

static BROWSERS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    // Order matters: Edge and Opera also advertise Chrome, Chrome advertises Safari.
    [
        ("Edge", r"Edg(e|A|iOS)?/"),
        ("Opera", r"OPR/|Opera"),
        ("Firefox", r"Firefox/|FxiOS/"),
        ("Chrome", r"Chrome/|CriOS/"),
        ("Safari", r"Safari/"),
        ("curl", r"^curl/"),
    ]
    .into_iter()
    .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|regex| (name, regex)))
    .collect()
});

fn operating_system(user_agent: &str) -> Option<&'static str> {
    if user_agent.contains("Windows") {
        Some("Windows")
    } else if user_agent.contains("Android") {
        Some("Android")
    } else if user_agent.contains("iPhone") || user_agent.contains("iPad") {
        Some("iOS")
    } else if user_agent.contains("Mac OS X") || user_agent.contains("Macintosh") {
        Some("macOS")
    } else if user_agent.contains("CrOS") {
        Some("ChromeOS")
    } else if user_agent.contains("Linux") {
        Some("Linux")
    } else {
        None
    }
}

fn device(user_agent: &str) -> Option<&'static str> {
    if user_agent.contains("iPhone") {
        Some("iPhone")
    } else if user_agent.contains("iPad") {
        Some("iPad")
    } else if user_agent.contains("Mobile") {
        Some("Mobile")
    } else {
        None
    }
}

/// Describe a user agent as `Name (OS - Device)`, dropping the parts that
/// cannot be identified.
#[must_use]
pub fn describe(user_agent: &str) -> String {
    let name = BROWSERS
        .iter()
        .find(|(_, regex)| regex.is_match(user_agent))
        .map_or("Unknown", |(name, _)| *name);

    match (operating_system(user_agent), device(user_agent)) {
        (Some(os), Some(device)) => format!("{name} ({os} - {device})"),
        (Some(os), None) => format!("{name} ({os})"),
        (None, Some(device)) => format!("{name} ({device})"),
        (None, None) => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desktop_browsers() {
        let chrome = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                      (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
        assert_eq!(describe(chrome), "Chrome (Windows)");

        let edge = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91";
        assert_eq!(describe(edge), "Edge (Windows)");

        let firefox = "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";
        assert_eq!(describe(firefox), "Firefox (Linux)");

        let safari = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 \
                      (KHTML, like Gecko) Version/17.2 Safari/605.1.15";
        assert_eq!(describe(safari), "Safari (macOS)");
    }

    #[test]
    fn test_mobile() {
        let iphone = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 \
                      (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1";
        assert_eq!(describe(iphone), "Safari (iOS - iPhone)");

        let android = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 \
                       (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";
        assert_eq!(describe(android), "Chrome (Android - Mobile)");
    }

    #[test]
    fn test_unknown() {
        assert_eq!(describe(""), "Unknown");
        assert_eq!(describe("curl/8.5.0"), "curl");
    }
}
