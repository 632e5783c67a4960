//! User-agent classification.

use axum::http::{HeaderMap, header::USER_AGENT};

use crate::cache::{ClientProfile, DeviceClass};

const CRAWLER_MARKERS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "slurp",
    "facebookexternalhit",
    "embedly",
    "curl/",
    "wget/",
    "python-requests",
    "go-http-client",
];

const MOBILE_MARKERS: &[&str] = &[
    "mobile",
    "android",
    "iphone",
    "ipod",
    "blackberry",
    "opera mini",
    "windows phone",
    "iemobile",
];

/// Maps a `User-Agent` header to a [`ClientProfile`].
///
/// Tablets are treated as desktop clients. An explicit `mobile` query or
/// cookie override is honored by the caller, not here.
#[derive(Debug, Clone, Default)]
pub struct UserAgentClassifier;

impl UserAgentClassifier {
    pub fn classify(&self, headers: &HeaderMap) -> ClientProfile {
        let agent = headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        self.classify_agent(agent)
    }

    pub fn classify_agent(&self, agent: &str) -> ClientProfile {
        let agent = agent.to_ascii_lowercase();
        let crawler = CRAWLER_MARKERS.iter().any(|marker| agent.contains(marker));
        let mobile = !agent.contains("ipad")
            && MOBILE_MARKERS.iter().any(|marker| agent.contains(marker));

        ClientProfile {
            device: if mobile {
                DeviceClass::Mobile
            } else {
                DeviceClass::Pc
            },
            crawler,
        }
    }
}
