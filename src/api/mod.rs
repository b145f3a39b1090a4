// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info_span, Span};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{
        claims::{AuthContext, AuthType},
        magic_link::{MagicLinkMode, MagicLinkRequest},
        middleware::{ai_rate_limit, audit_requests, authenticate, REQUEST_ID_HEADER},
        oauth::ProviderInfo,
        rate_limit::RateLimitDecision,
        resolver::API_TOKEN_HEADER,
        AccountRole, Role,
    },
    state::AppState,
    storage::{AuditLogEntry, SecretKey},
};

pub mod admin;
pub mod ai;
pub mod auth;
pub mod health;
pub mod oauth;
pub mod superadmin;

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/v1/auth/magic-link", post(auth::request_magic_link))
        .route("/v1/auth/magic-link/verify", post(auth::verify_magic_link))
        .route("/v1/auth/login", post(auth::login))
        .route("/v1/auth/logout", post(auth::logout))
        .route("/v1/auth/oauth/providers", get(oauth::list_providers))
        .route("/v1/auth/oauth/{provider}/start", get(oauth::start))
        .route("/v1/auth/oauth/{provider}/callback", get(oauth::callback))
        .route("/v1/superadmin/login", post(superadmin::login))
        .route("/v1/superadmin/logout", post(superadmin::logout));

    let ai_routes = Router::new()
        .route("/v1/ai/usage", get(ai::usage))
        .route_layer(from_fn_with_state(state.clone(), ai_rate_limit));

    // Resolver and audit trail for every route below
    let protected = Router::new()
        .route("/v1/auth/me", get(auth::me).patch(auth::update_me))
        .route("/v1/auth/password", put(auth::change_password))
        .route(
            "/v1/superadmin/credentials",
            post(superadmin::change_credentials),
        )
        .route("/v1/admin/users", get(admin::list_users))
        .route("/v1/admin/users/{user_id}", delete(admin::delete_user))
        .route("/v1/admin/users/{user_id}/role", put(admin::set_role))
        .route(
            "/v1/admin/users/{user_id}/sessions",
            delete(admin::revoke_sessions),
        )
        .route(
            "/v1/admin/users/{user_id}/password",
            put(admin::set_password),
        )
        .route("/v1/admin/audit", get(admin::list_audit))
        .route("/v1/admin/secrets", get(admin::list_secrets))
        .route(
            "/v1/admin/secrets/{key}",
            put(admin::put_secret).delete(admin::delete_secret),
        )
        .merge(ai_routes)
        .route_layer(from_fn_with_state(state.clone(), authenticate))
        .route_layer(from_fn_with_state(state.clone(), audit_requests));

    let cors = cors_layer(&state.config.base_origin());

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors),
        )
}

/// Credentialed CORS for the app's own origin only.
fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(API_TOKEN_HEADER),
        ])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ]);
    match HeaderValue::from_str(origin) {
        Ok(origin) => cors
            .allow_origin(AllowOrigin::exact(origin))
            .allow_credentials(true),
        Err(_) => {
            tracing::warn!(origin, "Base URL origin is not a valid header; CORS disabled");
            cors
        }
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        auth::request_magic_link,
        auth::verify_magic_link,
        auth::login,
        auth::logout,
        auth::me,
        auth::update_me,
        auth::change_password,
        oauth::list_providers,
        oauth::start,
        oauth::callback,
        superadmin::login,
        superadmin::logout,
        superadmin::change_credentials,
        admin::list_users,
        admin::set_role,
        admin::revoke_sessions,
        admin::set_password,
        admin::delete_user,
        admin::list_audit,
        admin::list_secrets,
        admin::put_secret,
        admin::delete_secret,
        ai::usage
    ),
    components(
        schemas(
            AccountRole,
            Role,
            AuthType,
            AuthContext,
            MagicLinkMode,
            MagicLinkRequest,
            ProviderInfo,
            RateLimitDecision,
            AuditLogEntry,
            SecretKey,
            auth::UserResponse,
            auth::MeResponse,
            auth::MagicLinkResponse,
            auth::VerifyMagicLinkRequest,
            auth::LoginRequest,
            auth::UpdateProfileRequest,
            auth::ChangePasswordRequest,
            auth::RevokedSessionsResponse,
            superadmin::SuperadminLoginRequest,
            superadmin::ChangeCredentialsRequest,
            superadmin::SuperadminResponse,
            admin::UserListResponse,
            admin::SetRoleRequest,
            admin::SetPasswordRequest,
            admin::AuditLogResponse,
            admin::SecretListResponse,
            admin::PutSecretRequest,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Health", description = "Liveness and readiness"),
        (name = "Auth", description = "Magic links, passwords and sessions"),
        (name = "OAuth", description = "OAuth2 authorization code sign-in"),
        (name = "Superadmin", description = "Superadmin slot"),
        (name = "Admin", description = "User, audit and secret management"),
        (name = "AI", description = "Rate-limited AI surface")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::cookies::{SESSION_COOKIE, SUPERADMIN_COOKIE};
    use crate::auth::ClientInfo;
    use crate::config::{AppConfig, DEFAULT_SUPERADMIN_PASSWORD, DEFAULT_SUPERADMIN_USERNAME};
    use crate::state::test_support::test_state;
    use crate::storage::NewUser;
    use axum::{
        body::to_bytes,
        http::{header::COOKIE, header::SET_COOKIE, StatusCode},
        response::Response,
    };
    use chrono::Utc;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn json_request(method: Method, uri: &str, body: Value, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    /// `name=value` from the response's Set-Cookie header.
    fn cookie_pair(response: &Response, name: &str) -> String {
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&format!("{name}=")))
            .and_then(|v| v.split(';').next())
            .unwrap()
            .to_string()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let (state, _mailer, _dir) = test_state(AppConfig::default());
        let _ = router(state).into_make_service();
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/v1/auth/me"));
        assert!(doc.paths.paths.contains_key("/v1/admin/audit"));
    }

    #[tokio::test]
    async fn magic_link_signup_then_me() {
        let (state, mailer, _dir) = test_state(AppConfig::default());
        let app = router(state);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/v1/auth/magic-link",
                json!({ "email": "new@example.com", "mode": "signup" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let link = mailer.last_link().unwrap();
        let token = link.split("token=").nth(1).unwrap().to_string();
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/v1/auth/magic-link/verify",
                json!({ "token": token }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = cookie_pair(&response, SESSION_COOKIE);

        let response = app
            .clone()
            .oneshot(get_request("/v1/auth/me", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["authType"], "session");
        assert_eq!(body["user"]["email"], "new@example.com");
        assert_eq!(body["user"]["role"], "organizer");
        assert!(body["user"]["emailVerifiedAt"].is_string());

        // The link is single use
        let replay = app
            .oneshot(json_request(
                Method::POST,
                "/v1/auth/magic-link/verify",
                json!({ "token": token }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_password_is_generic() {
        let (state, _mailer, _dir) = test_state(AppConfig::default());
        let user = state
            .store
            .create_user(
                NewUser {
                    email: "host@example.com".to_string(),
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap();
        state
            .passwords
            .set_password(&user.id, Some("correct horse battery"))
            .unwrap();
        let app = router(state);

        let wrong = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/v1/auth/login",
                json!({ "email": "host@example.com", "password": "wrong horse" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        let wrong = body_json(wrong).await;
        assert_eq!(wrong["error"], "Invalid email or password");

        let unknown = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/v1/auth/login",
                json!({ "email": "nobody@example.com", "password": "wrong horse" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(unknown).await, wrong);

        let ok = app
            .oneshot(json_request(
                Method::POST,
                "/v1/auth/login",
                json!({ "email": "host@example.com", "password": "correct horse battery" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert!(cookie_pair(&ok, SESSION_COOKIE).len() > SESSION_COOKIE.len() + 1);
    }

    #[tokio::test]
    async fn superadmin_credential_rotation() {
        let (state, _mailer, _dir) = test_state(AppConfig::default());
        let app = router(state);
        let login = |password: &str| {
            json_request(
                Method::POST,
                "/v1/superadmin/login",
                json!({ "username": DEFAULT_SUPERADMIN_USERNAME, "password": password }),
                None,
            )
        };

        let response = app
            .clone()
            .oneshot(login(DEFAULT_SUPERADMIN_PASSWORD))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = cookie_pair(&response, SUPERADMIN_COOKIE);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/v1/superadmin/credentials",
                json!({
                    "currentPassword": DEFAULT_SUPERADMIN_PASSWORD,
                    "newPassword": "a much better passphrase"
                }),
                Some(&cookie),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Old session and old password are both gone
        let response = app
            .clone()
            .oneshot(get_request("/v1/admin/audit", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app
            .clone()
            .oneshot(login(DEFAULT_SUPERADMIN_PASSWORD))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(login("a much better passphrase"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_routes_enforce_roles() {
        let config = AppConfig {
            api_token: Some("machine-token".to_string()),
            ..AppConfig::default()
        };
        let (state, _mailer, _dir) = test_state(config);
        let user = state
            .store
            .create_user(
                NewUser {
                    email: "organizer@example.com".to_string(),
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap();
        let session = state
            .sessions
            .create(&user.id, &ClientInfo::default())
            .unwrap();
        let organizer_cookie = format!("{SESSION_COOKIE}={}", session.token);
        let app = router(state);

        let response = app
            .clone()
            .oneshot(get_request("/v1/admin/users", Some(&organizer_cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // The API token passes the admin gate but never the superadmin-session gate
        let with_token = |uri: &str| {
            Request::builder()
                .uri(uri)
                .header(AUTHORIZATION, "Bearer machine-token")
                .body(Body::empty())
                .unwrap()
        };
        let response = app
            .clone()
            .oneshot(with_token("/v1/admin/users"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.oneshot(with_token("/v1/admin/audit")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn protected_routes_need_credentials_and_unknown_routes_404() {
        let (state, _mailer, _dir) = test_state(AppConfig::default());
        let app = router(state);

        let response = app
            .clone()
            .oneshot(get_request("/v1/auth/me", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));

        let response = app
            .oneshot(get_request("/v1/nothing-here", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oauth_callback_failure_redirects_to_login() {
        let (state, _mailer, _dir) = test_state(AppConfig::default());
        let response = router(state)
            .oneshot(get_request(
                "/v1/auth/oauth/google/callback?code=abc&state=forged",
                None,
            ))
            .await
            .unwrap();
        assert!(response.status().is_redirection());
        assert_eq!(
            response.headers()["location"],
            crate::auth::oauth::SIGN_IN_FAILED_REDIRECT
        );
    }
}
