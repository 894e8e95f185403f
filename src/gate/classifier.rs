//! Request classification.
//!
//! Handlers are listed in [`HOOKS`] as explicit `(stage, handler)` pairs. A request
//! walks the stages in order: [`Stage::Init`] for every request,
//! [`Stage::TemplateRedirect`] when the rewrite table set the login marker, and
//! [`Stage::LoginInit`] when the legacy login entry point loads (directly, or on
//! behalf of the slug). The first handler that halts decides the outcome.

use super::context::{Area, RequestContext};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    NotFound,
    RenderLogin,
    PassThrough,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Init,
    TemplateRedirect,
    LoginInit,
}

impl Stage {
    const ORDER: [Self; 3] = [Self::Init, Self::TemplateRedirect, Self::LoginInit];

    fn applies(self, ctx: &RequestContext) -> bool {
        match self {
            Self::Init => true,
            Self::TemplateRedirect => ctx.marker,
            Self::LoginInit => ctx.area == Area::LegacyLogin,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt(Decision),
}

pub type Handler = fn(&mut RequestContext) -> Flow;

pub const HOOKS: [(Stage, Handler); 3] = [
    (Stage::Init, block_admin_when_logged_out),
    (Stage::TemplateRedirect, render_login_from_slug),
    (Stage::LoginInit, block_legacy_direct_access),
];

/// Run every handler registered for `stage`.
pub fn dispatch(stage: Stage, ctx: &mut RequestContext) -> Flow {
    for (hook_stage, handler) in HOOKS {
        if hook_stage != stage {
            continue;
        }
        if let Flow::Halt(decision) = handler(ctx) {
            debug!(?stage, ?decision, path = %ctx.path, "request halted");
            return Flow::Halt(decision);
        }
    }
    Flow::Continue
}

/// Classify a request. Consumes the one-shot permission it may grant along the way.
pub fn classify(ctx: &mut RequestContext) -> Decision {
    for stage in Stage::ORDER {
        if !stage.applies(ctx) {
            continue;
        }
        if let Flow::Halt(decision) = dispatch(stage, ctx) {
            return decision;
        }
    }
    Decision::PassThrough
}

fn block_admin_when_logged_out(ctx: &mut RequestContext) -> Flow {
    if !ctx.is_admin_area()
        || ctx.authenticated
        || ctx.is_trusted_agent()
        || ctx.is_async_data_call()
    {
        return Flow::Continue;
    }
    Flow::Halt(Decision::NotFound)
}

fn render_login_from_slug(ctx: &mut RequestContext) -> Flow {
    ctx.legacy_access_permitted = true;

    // Delegating to the legacy renderer fires its own init stage; it never returns here.
    match dispatch(Stage::LoginInit, ctx) {
        Flow::Continue => Flow::Halt(Decision::RenderLogin),
        halted @ Flow::Halt(_) => halted,
    }
}

fn block_legacy_direct_access(ctx: &mut RequestContext) -> Flow {
    if ctx.legacy_access_permitted || ctx.is_trusted_agent() {
        return Flow::Continue;
    }
    Flow::Halt(Decision::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::context::AgentKind;

    #[test]
    fn legacy_login_without_marker_is_hidden() {
        let mut ctx = RequestContext::new("/wp-login.php", Area::LegacyLogin);
        assert_eq!(classify(&mut ctx), Decision::NotFound);
        assert!(!ctx.legacy_access_permitted);
    }

    #[test]
    fn legacy_login_hidden_even_when_authenticated() {
        let mut ctx =
            RequestContext::new("/wp-login.php", Area::LegacyLogin).with_authenticated(true);
        assert_eq!(classify(&mut ctx), Decision::NotFound);
    }

    #[test]
    fn slug_match_renders_login() {
        let mut ctx = RequestContext::new("/portal/", Area::Site).with_marker(true);
        assert_eq!(classify(&mut ctx), Decision::RenderLogin);
        assert!(ctx.legacy_access_permitted);
    }

    #[test]
    fn trusted_agent_reaches_legacy_login() {
        for agent in [AgentKind::ScheduledTask, AgentKind::Automation] {
            let mut ctx =
                RequestContext::new("/wp-login.php", Area::LegacyLogin).with_agent(Some(agent));
            assert_eq!(classify(&mut ctx), Decision::PassThrough);
        }
    }

    #[test]
    fn admin_area_hidden_from_anonymous() {
        for path in ["/wp-admin", "/wp-admin/", "/wp-admin/options-general.php"] {
            let mut ctx = RequestContext::new(path, Area::Admin);
            assert_eq!(classify(&mut ctx), Decision::NotFound, "{path}");
        }
    }

    #[test]
    fn admin_area_open_to_authenticated_and_agents() {
        let mut ctx = RequestContext::new("/wp-admin/", Area::Admin).with_authenticated(true);
        assert_eq!(classify(&mut ctx), Decision::PassThrough);

        let mut ctx =
            RequestContext::new("/wp-admin/", Area::Admin).with_agent(Some(AgentKind::Automation));
        assert_eq!(classify(&mut ctx), Decision::PassThrough);
    }

    #[test]
    fn async_data_calls_pass() {
        let mut ctx = RequestContext::new("/wp-admin/admin-ajax.php", Area::AsyncData);
        assert_eq!(classify(&mut ctx), Decision::PassThrough);
    }

    #[test]
    fn ordinary_pages_pass() {
        let mut ctx = RequestContext::new("/about/", Area::Site);
        assert_eq!(classify(&mut ctx), Decision::PassThrough);
        assert!(!ctx.legacy_access_permitted);
    }

    #[test]
    fn admin_guard_runs_first() {
        // A marker can never be set on an admin path, but the guard must win regardless.
        let mut ctx = RequestContext::new("/wp-admin/", Area::Admin).with_marker(true);
        assert_eq!(classify(&mut ctx), Decision::NotFound);
        assert!(!ctx.legacy_access_permitted);
    }

    #[test]
    fn hooks_table_covers_every_stage() {
        for stage in Stage::ORDER {
            assert!(HOOKS.iter().any(|(hook_stage, _)| *hook_stage == stage));
        }
    }
}
