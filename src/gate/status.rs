//! Diagnostics surfaced to administrators.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    /// Pretty permalinks are off, so the slug rule can never match.
    PermalinksDisabled,
    /// The active rewrite table has no rule for the current slug.
    RuleMissing,
}

impl Notice {
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::PermalinksDisabled => {
                "For the custom login URL to work reliably, please enable pretty permalinks."
            }
            Self::RuleMissing => {
                "No rewrite rule found. Flush the rewrite rules to fix this."
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Status {
    pub slug: String,
    pub login_url: String,
    pub pretty_permalinks: bool,
    pub rule_found: bool,
    pub notices: Vec<Notice>,
}

impl Status {
    #[must_use]
    pub fn new(slug: String, login_url: String, pretty_permalinks: bool, rule_found: bool) -> Self {
        let mut notices = Vec::new();
        if !pretty_permalinks {
            notices.push(Notice::PermalinksDisabled);
        }
        if !rule_found {
            notices.push(Notice::RuleMissing);
        }
        Self {
            slug,
            login_url,
            pretty_permalinks,
            rule_found,
            notices,
        }
    }
}
