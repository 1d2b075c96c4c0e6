//! Session cookie contract.
//!
//! Three cookies per session: the two token cookies are HttpOnly, while
//! `has-refresh-token` is script-readable so the frontend can tell whether
//! a silent refresh is worth attempting without access to the tokens
//! themselves. All three are set together and cleared together.

use axum::http::{HeaderMap, header};

use crate::token::IssuedToken;

/// Cookie holding the access token (HttpOnly).
pub const ACCESS_COOKIE_NAME: &str = "session-access-token";

/// Cookie holding the refresh token (HttpOnly).
pub const REFRESH_COOKIE_NAME: &str = "session-refresh-token";

/// Script-readable marker mirroring the refresh cookie's lifetime.
pub const REFRESH_MARKER_COOKIE_NAME: &str = "has-refresh-token";

/// Builds Set-Cookie header values for the session cookie set.
#[derive(Debug, Clone, Copy)]
pub struct SessionCookieManager {
    secure: bool,
}

impl SessionCookieManager {
    pub fn new(secure: bool) -> Self {
        Self { secure }
    }

    fn secure_suffix(&self) -> &'static str {
        if self.secure { "; Secure" } else { "" }
    }

    /// The full cookie set issued at login: access, refresh, and the
    /// script-readable refresh marker.
    pub fn login_cookies(&self, access: &IssuedToken, refresh: &IssuedToken) -> Vec<String> {
        let secure = self.secure_suffix();
        vec![
            format!(
                "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}{}",
                ACCESS_COOKIE_NAME, access.token, access.max_age, secure
            ),
            format!(
                "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}{}",
                REFRESH_COOKIE_NAME, refresh.token, refresh.max_age, secure
            ),
            // Deliberately not HttpOnly
            format!(
                "{}=true; SameSite=Strict; Path=/; Max-Age={}{}",
                REFRESH_MARKER_COOKIE_NAME, refresh.max_age, secure
            ),
        ]
    }

    /// A replacement access cookie only, for the silent refresh flow.
    pub fn access_cookie(&self, access: &IssuedToken) -> String {
        format!(
            "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}{}",
            ACCESS_COOKIE_NAME, access.token, access.max_age,
            self.secure_suffix()
        )
    }

    /// Expire all three session cookies (logout, or any response that
    /// tears the session down).
    pub fn clear_all(&self) -> Vec<String> {
        let secure = self.secure_suffix();
        vec![
            format!(
                "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0{}",
                ACCESS_COOKIE_NAME, secure
            ),
            format!(
                "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0{}",
                REFRESH_COOKIE_NAME, secure
            ),
            format!(
                "{}=; SameSite=Strict; Path=/; Max-Age=0{}",
                REFRESH_MARKER_COOKIE_NAME, secure
            ),
        ]
    }
}

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}
