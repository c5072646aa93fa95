use url::Url;

use super::types::Step;
use crate::core::config::PortalConfig;

/// The parts of a page URL the rule table looks at.
struct PageUrl {
    host: String,
    path: String,
    /// Query and fragment; the bearer callback carries its token in either.
    tail: String,
}

impl PageUrl {
    fn parse(raw: &str) -> Option<Self> {
        let url = Url::parse(raw).ok()?;
        let host = url.host_str()?.to_ascii_lowercase();
        let tail = format!(
            "{}#{}",
            url.query().unwrap_or_default(),
            url.fragment().unwrap_or_default()
        );
        Some(Self {
            host,
            path: url.path().to_string(),
            tail,
        })
    }

    fn on_portal_home(&self, portal: &PortalConfig) -> bool {
        self.host == portal.portal_host && self.path.starts_with("/Home")
    }
}

struct Rule {
    step: Step,
    matches: fn(&PageUrl, &PortalConfig) -> bool,
}

/// Ordered; first match wins. The bearer callback shares its host and path
/// with the plain home page, so the "no token" rule must come first and
/// exclude any callback marker.
const RULES: &[Rule] = &[
    Rule {
        step: Step::FillCredentials,
        matches: |u, p| u.host == p.identity_host,
    },
    Rule {
        step: Step::ClickLogin,
        matches: |u, p| {
            u.on_portal_home(p) && !u.tail.contains("token_type=") && !u.tail.contains("code=")
        },
    },
    Rule {
        step: Step::ClickFederatedLogin,
        matches: |u, p| u.host == p.sso_host,
    },
    Rule {
        step: Step::SelectOrganization,
        matches: |u, p| u.on_portal_home(p) && u.tail.contains("token_type=Bearer"),
    },
    Rule {
        step: Step::Finalize,
        matches: |u, p| u.host == p.portal_host && u.path.starts_with("/Portal"),
    },
    Rule {
        step: Step::SuccessTerminal,
        matches: |u, p| u.host == p.target_host,
    },
];

/// Maps a page URL to the workflow step it represents.
pub fn classify(raw_url: &str, portal: &PortalConfig) -> Step {
    let Some(url) = PageUrl::parse(raw_url) else {
        return Step::RedirectToHome;
    };
    RULES
        .iter()
        .find(|rule| (rule.matches)(&url, portal))
        .map(|rule| rule.step)
        .unwrap_or(Step::RedirectToHome)
}

/// True when `current` differs from `start` and contains one of `patterns`.
pub fn is_expected_redirect(start: &str, current: &str, patterns: &[&str]) -> bool {
    current != start && patterns.iter().any(|p| current.contains(p))
}
