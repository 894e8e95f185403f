//! # Loginveil (Login Entry Point Gateway)
//!
//! `loginveil` is an HTTP gateway that sits in front of a CMS and moves its login
//! entry point from the well-known `/wp-login.php` and `/wp-admin` paths to an
//! administrator-chosen slug such as `/portal/`.
//!
//! ## Request flow
//!
//! Every request is classified once by the [`gate::classifier`]:
//!
//! - **Admin area:** unauthenticated requests for `/wp-admin` receive `404 Not Found`
//!   unless they come from a trusted internal agent or are asynchronous data calls.
//! - **Slug:** requests matching the compiled rewrite rule for the current slug are
//!   forwarded to the upstream login page.
//! - **Legacy entry point:** direct requests for `/wp-login.php` receive `404 Not Found`.
//!
//! Everything else is proxied unchanged. Responses coming back from the upstream have
//! their legacy login URLs (redirects and HTML links) rewritten to the slug, while
//! every query parameter is preserved.
//!
//! ## Settings
//!
//! The slug lives in a key-value [`settings::Settings`] store (a JSON file in
//! production). Changing it rebuilds and flushes the rewrite table so no stale rule
//! survives.
//!
//! Unauthorized requests against the admin API return `404 Not Found` rather than
//! `401 Unauthorized` so the API itself cannot be discovered by probing.

pub mod api;
pub mod cli;
pub mod gate;
pub mod settings;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
