//! Conversion between `SessionCookie` values and HTTP cookie headers.

use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite as CookieSameSite};

use lecture_auth::{SameSite, SessionCookie};

pub fn to_cookie(cookie: &SessionCookie) -> Cookie<'static> {
    let same_site = match cookie.same_site {
        SameSite::Strict => CookieSameSite::Strict,
        SameSite::Lax => CookieSameSite::Lax,
    };
    let max_age = i64::try_from(cookie.max_age.as_secs()).unwrap_or(i64::MAX);
    Cookie::build((cookie.name.clone(), cookie.value.clone()))
        .path(cookie.path.clone())
        .http_only(cookie.http_only)
        .secure(cookie.secure)
        .same_site(same_site)
        .max_age(time::Duration::seconds(max_age))
        .build()
}

/// Value of cookie `name` in the request headers, if present and non-empty.
pub fn read(headers: &HeaderMap, name: &str) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(name)
        .map(|c| c.value().trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn append(response: &mut Response, cookie: &SessionCookie) {
    match HeaderValue::from_str(&to_cookie(cookie).to_string()) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => tracing::error!(cookie = %cookie.name, error = %e, "cookie is not a valid header value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use lecture_auth::{CookiePolicy, TokenId};

    #[test]
    fn session_cookie_attributes() {
        let policy = CookiePolicy::new("session", "/api", true);
        let token = TokenId::generate();
        let header = to_cookie(&policy.issue(&token, Duration::from_secs(3600))).to_string();

        assert!(header.starts_with(&format!("session={}", token.as_str())));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("Secure"));
        assert!(header.contains("SameSite=Strict"));
        assert!(header.contains("Path=/api"));
        assert!(header.contains("Max-Age=3600"));
    }

    #[test]
    fn clearing_cookie_has_zero_max_age() {
        let policy = CookiePolicy::new("session", "/", false);
        let header = to_cookie(&policy.clear()).to_string();
        assert!(header.contains("Max-Age=0"));
        assert!(!header.contains("Secure"));
    }

    #[test]
    fn reads_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("device_id=dev-1; session=abc"),
        );
        assert_eq!(read(&headers, "session").as_deref(), Some("abc"));
        assert_eq!(read(&headers, "device_id").as_deref(), Some("dev-1"));
        assert_eq!(read(&headers, "other"), None);
    }
}
