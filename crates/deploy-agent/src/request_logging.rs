use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{info, warn};

static LOG_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Logs method, route, handler, status and latency. Bodies are never read: they
/// carry tokens and webhook payloads.
pub async fn log_request(request: Request<Body>, next: Next) -> Response {
    let method = request.method().as_str().to_string();
    let route = request.extensions().get::<MatchedPath>().map_or_else(
        || request.uri().path().to_string(),
        |matched_path| matched_path.as_str().to_string(),
    );
    let handler = handler_name(&method, &route);
    let log_number = LOG_COUNTER.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    if response.status().is_server_error() {
        warn!(log_number, handler, method = %method, route = %route, status, elapsed_ms, "request failed");
    } else {
        info!(log_number, handler, method = %method, route = %route, status, elapsed_ms, "request handled");
    }

    response
}

fn handler_name(method: &str, route: &str) -> &'static str {
    let route = route.strip_prefix("/api/github").unwrap_or(route);
    match (method, route) {
        ("POST", "/api/auth/setup") => "auth.auth_setup",
        ("POST", "/api/auth/login") => "auth.auth_login",
        ("POST", "/api/auth/status") => "auth.auth_status",
        ("POST", "/api/auth/session") => "auth.auth_session",
        ("POST", "/api/auth/users") => "auth.auth_create_user",
        ("POST", "/verify-token") => "links.verify_token",
        ("GET", "/repos") => "links.list_repositories",
        ("GET", "/config") => "links.list_links",
        ("POST", "/config") => "links.create_link",
        ("GET", "/config/:instance") => "links.get_link",
        ("DELETE", "/config/:instance") => "links.delete_link",
        ("POST", "/config/:instance/reset") => "links.reset_link",
        ("POST", "/config/:instance/reconfigure") => "links.reconfigure_link",
        ("POST", "/config/:instance/webhook") => "links.configure_webhook",
        ("POST", "/config/:instance/test-deploy") => "deploys.test_deploy",
        ("POST", "/init-repo") => "git_actions.init_repo",
        ("GET", "/status/:instance") => "git_actions.status",
        ("POST", "/commit") => "git_actions.commit",
        ("POST", "/push") => "git_actions.push",
        ("POST", "/pull") => "git_actions.pull",
        ("GET", "/history/:instance") => "git_actions.history",
        ("GET", "/diff/:instance") => "git_actions.diff",
        ("GET", "/branches/:instance") => "git_actions.branches",
        ("POST", "/deploy/:instance") => "deploys.manual_deploy",
        ("GET", "/deploy-logs/:instance") => "deploys.deploy_logs",
        ("POST", "/webhook/:instance") => "webhook.receive_webhook",
        _ => "unknown.unknown_handler",
    }
}

#[cfg(test)]
mod tests {
    use super::handler_name;

    #[test]
    fn github_routes_resolve_without_their_prefix() {
        assert_eq!(
            handler_name("POST", "/api/github/webhook/:instance"),
            "webhook.receive_webhook"
        );
        assert_eq!(
            handler_name("DELETE", "/api/github/config/:instance"),
            "links.delete_link"
        );
    }

    #[test]
    fn auth_routes_resolve() {
        assert_eq!(handler_name("POST", "/api/auth/login"), "auth.auth_login");
    }

    #[test]
    fn unmatched_routes_fall_back() {
        assert_eq!(handler_name("GET", "/nope"), "unknown.unknown_handler");
        assert_eq!(
            handler_name("GET", "/api/github/webhook/:instance"),
            "unknown.unknown_handler"
        );
    }
}
