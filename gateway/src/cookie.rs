use std::fmt;

use chrono::Duration;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};

/// Name of the cookie that binds a browser to its visitor session.
pub const VISITOR_COOKIE: &str = "oidc_visitor";

/// How long a visitor session outlives its last login.
pub const VISITOR_COOKIE_MAX_AGE: Duration = Duration::days(1);

/// `Set-Cookie` value of the visitor cookie.
///
/// Always `HttpOnly` with `Path=/`. The provider redirects back cross-site,
/// `SameSite=Lax` still sends the cookie on that top level navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorCookie {
    value: String,
    max_age: Duration,
    secure: bool,
}

impl VisitorCookie {
    pub fn issue(visitor_id: impl Into<String>, secure: bool) -> Self {
        Self {
            value: visitor_id.into(),
            max_age: VISITOR_COOKIE_MAX_AGE,
            secure,
        }
    }

    /// A cookie that makes the browser drop the visitor id.
    pub fn expired() -> Self {
        Self {
            value: String::new(),
            max_age: Duration::zero(),
            secure: false,
        }
    }

    /// Reads the visitor id from the request cookies. Empty values are
    /// treated as absent.
    pub fn read(headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|header| header.to_str().ok())
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find_map(|(name, value)| {
                (name == VISITOR_COOKIE && !value.is_empty()).then(|| value.to_string())
            })
    }
}

impl fmt::Display for VisitorCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{VISITOR_COOKIE}={}; Max-Age={}; Path=/",
            self.value,
            self.max_age.num_seconds()
        )?;
        if self.secure {
            f.write_str("; Secure")?;
        }
        f.write_str("; HttpOnly; SameSite=Lax")
    }
}

/// Attaches a visitor cookie to a response or response builder.
pub trait SetCookieExt {
    fn set_cookie(self, cookie: &VisitorCookie) -> Self;
}

impl SetCookieExt for http::response::Builder {
    /// An invalid value surfaces as an error when the body is set.
    fn set_cookie(self, cookie: &VisitorCookie) -> Self {
        self.header(SET_COOKIE, cookie.to_string())
    }
}

impl<B> SetCookieExt for http::Response<B> {
    fn set_cookie(mut self, cookie: &VisitorCookie) -> Self {
        if let Ok(value) = HeaderValue::try_from(cookie.to_string()) {
            self.headers_mut().append(SET_COOKIE, value);
        }
        self
    }
}
