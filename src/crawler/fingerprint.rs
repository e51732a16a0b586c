//! Browser fingerprints for sessions
//!
//! Each session presents one consistent browser identity: the user agent,
//! client-hint headers, viewport and locale all come from the same profile.

/// Device class of a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Desktop,
    Mobile,
}

/// The identity a session presents to the shop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub device: DeviceKind,
    pub os: String,
    pub locale: String,
}

impl Fingerprint {
    /// Headers sent with every request of the session, besides `user-agent`
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let language = self.locale.split('-').next().unwrap_or("en");
        let mut headers = vec![
            (
                "accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
            ),
            (
                "accept-language",
                format!("{},{};q=0.9,en-US;q=0.8,en;q=0.7", self.locale, language),
            ),
        ];

        if self.user_agent.contains("Chrome/") {
            headers.push(("sec-ch-ua-platform", format!("\"{}\"", self.os)));
            headers.push((
                "sec-ch-ua-mobile",
                if self.device == DeviceKind::Mobile { "?1" } else { "?0" }.to_string(),
            ));
        }

        headers
    }
}

struct Profile {
    os: &'static str,
    device: DeviceKind,
    user_agent: &'static str,
    viewports: &'static [(u32, u32)],
}

const DESKTOP_VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1536, 864), (1440, 900), (1366, 768)];
const MOBILE_VIEWPORTS: &[(u32, u32)] = &[(390, 844), (412, 915), (360, 800)];

const PROFILES: &[Profile] = &[
    Profile {
        os: "Windows",
        device: DeviceKind::Desktop,
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        viewports: DESKTOP_VIEWPORTS,
    },
    Profile {
        os: "Windows",
        device: DeviceKind::Desktop,
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
        viewports: DESKTOP_VIEWPORTS,
    },
    Profile {
        os: "macOS",
        device: DeviceKind::Desktop,
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        viewports: DESKTOP_VIEWPORTS,
    },
    Profile {
        os: "macOS",
        device: DeviceKind::Desktop,
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        viewports: DESKTOP_VIEWPORTS,
    },
    Profile {
        os: "Linux",
        device: DeviceKind::Desktop,
        user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
        viewports: DESKTOP_VIEWPORTS,
    },
    Profile {
        os: "Linux",
        device: DeviceKind::Desktop,
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        viewports: DESKTOP_VIEWPORTS,
    },
    Profile {
        os: "Android",
        device: DeviceKind::Mobile,
        user_agent: "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
        viewports: MOBILE_VIEWPORTS,
    },
];

/// Draws random, internally consistent fingerprints
#[derive(Debug, Clone)]
pub struct FingerprintGenerator {
    devices: Vec<DeviceKind>,
    locale: String,
}

impl Default for FingerprintGenerator {
    fn default() -> Self {
        Self::new(vec![DeviceKind::Desktop], "cs-CZ")
    }
}

impl FingerprintGenerator {
    /// Creates a generator limited to the given device classes
    ///
    /// An empty device list allows every profile.
    pub fn new(devices: Vec<DeviceKind>, locale: impl Into<String>) -> Self {
        Self {
            devices,
            locale: locale.into(),
        }
    }

    pub fn generate(&self) -> Fingerprint {
        let candidates: Vec<&Profile> = PROFILES
            .iter()
            .filter(|p| self.devices.is_empty() || self.devices.contains(&p.device))
            .collect();

        let profile = if candidates.is_empty() {
            &PROFILES[0]
        } else {
            candidates[fastrand::usize(..candidates.len())]
        };
        let viewport = profile.viewports[fastrand::usize(..profile.viewports.len())];

        Fingerprint {
            user_agent: profile.user_agent.to_string(),
            viewport,
            device: profile.device,
            os: profile.os.to_string(),
            locale: self.locale.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_generates_desktop_czech() {
        let generator = FingerprintGenerator::default();
        for _ in 0..50 {
            let fp = generator.generate();
            assert_eq!(fp.device, DeviceKind::Desktop);
            assert_eq!(fp.locale, "cs-CZ");
            assert!(DESKTOP_VIEWPORTS.contains(&fp.viewport));
        }
    }

    #[test]
    fn test_mobile_only() {
        let generator = FingerprintGenerator::new(vec![DeviceKind::Mobile], "en-US");
        let fp = generator.generate();
        assert_eq!(fp.os, "Android");
        assert!(fp.user_agent.contains("Mobile"));
    }

    #[test]
    fn test_headers_follow_locale() {
        let fp = Fingerprint {
            user_agent: PROFILES[0].user_agent.to_string(),
            viewport: (1920, 1080),
            device: DeviceKind::Desktop,
            os: "Windows".to_string(),
            locale: "cs-CZ".to_string(),
        };
        let headers = fp.headers();
        let language = headers
            .iter()
            .find(|(name, _)| *name == "accept-language")
            .map(|(_, v)| v.as_str());
        assert_eq!(language, Some("cs-CZ,cs;q=0.9,en-US;q=0.8,en;q=0.7"));
        assert!(headers.iter().any(|(name, _)| *name == "sec-ch-ua-platform"));
    }
}
