// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Auth cookies.
//!
//! All cookies are `HttpOnly; SameSite=Lax; Path=/`, with `Secure` added
//! when the service is served over HTTPS.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};

/// User session cookie.
pub const SESSION_COOKIE: &str = "app_session";

/// Superadmin session cookie.
pub const SUPERADMIN_COOKIE: &str = "superadmin_session";

/// Static API token convenience cookie for browser clients.
pub const API_TOKEN_COOKIE: &str = "api_token";

/// Build a cookie carrying `token` for `max_age_secs`.
pub fn build_cookie(
    name: &str,
    token: &str,
    max_age_secs: i64,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{name}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Build a cookie that deletes `name` on the client.
pub fn clear_cookie(name: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(name, "", 0, secure)
}

/// Value of the named cookie across every `Cookie` header.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let Some((key, val)) = pair.trim().split_once('=') else {
                continue;
            };
            if key.trim() == name {
                let val = val.trim();
                if !val.is_empty() {
                    return Some(val.to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_attributes() {
        let cookie = build_cookie(SESSION_COOKIE, "tok", 60, false).unwrap();
        assert_eq!(
            cookie.to_str().unwrap(),
            "app_session=tok; Path=/; HttpOnly; SameSite=Lax; Max-Age=60"
        );
        let secure = build_cookie(SUPERADMIN_COOKIE, "tok", 60, true).unwrap();
        assert!(secure.to_str().unwrap().ends_with("; Secure"));

        let cleared = clear_cookie(SESSION_COOKIE, false).unwrap();
        assert!(cleared.to_str().unwrap().starts_with("app_session=; "));
        assert!(cleared.to_str().unwrap().contains("Max-Age=0"));
    }

    #[test]
    fn read_cookie_scans_all_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; app_session=abc"));
        headers.append(COOKIE, HeaderValue::from_static("superadmin_session=xyz"));
        assert_eq!(read_cookie(&headers, SESSION_COOKIE).as_deref(), Some("abc"));
        assert_eq!(read_cookie(&headers, SUPERADMIN_COOKIE).as_deref(), Some("xyz"));
        assert_eq!(read_cookie(&headers, API_TOKEN_COOKIE), None);
    }

    #[test]
    fn empty_cookie_counts_as_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("app_session="));
        assert_eq!(read_cookie(&headers, SESSION_COOKIE), None);
    }
}
