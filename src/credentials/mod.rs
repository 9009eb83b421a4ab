//! The provider session credential.
//!
//! A [`Credential`] is the value of the identity provider's `user_session`
//! cookie. Injecting it into a fresh browser lets the provider skip the
//! interactive login. It is loaded from configuration (or the optional local
//! [`SessionCache`]) at startup and replaced by the live cookie after a
//! successful run.

mod session;

pub use session::{SessionCache, SessionData};

use secrecy::{ExposeSecret, SecretString};

use crate::browser::Cookie;

/// Name of the provider cookie that carries the session.
pub const SESSION_COOKIE: &str = "user_session";

/// Domain the session cookie is bound to.
pub const SESSION_DOMAIN: &str = "github.com";

/// Opaque bearer session token for the identity provider.
#[derive(Debug, Clone)]
pub struct Credential(SecretString);

impl Credential {
    /// Wrap a token. Blank values are not credentials.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return None;
        }
        Some(Self(SecretString::from(value)))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// The cookie that seeds a browser context with this session.
    pub fn to_cookie(&self) -> Cookie {
        Cookie {
            name: SESSION_COOKIE.to_string(),
            value: self.expose().to_string(),
            domain: SESSION_DOMAIN.to_string(),
            path: "/".to_string(),
        }
    }

    /// Pick the live session out of a browser cookie jar.
    pub fn from_cookies(cookies: &[Cookie]) -> Option<Self> {
        cookies
            .iter()
            .find(|c| c.name == SESSION_COOKIE && is_session_domain(&c.domain))
            .and_then(|c| Self::new(c.value.clone()))
    }
}

fn is_session_domain(domain: &str) -> bool {
    let domain = domain.trim_start_matches('.');
    domain == SESSION_DOMAIN || domain.ends_with(&format!(".{SESSION_DOMAIN}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, value: &str, domain: &str) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
        }
    }

    #[test]
    fn blank_tokens_are_rejected() {
        assert!(Credential::new("").is_none());
        assert!(Credential::new("   ").is_none());
        assert!(Credential::new("abc").is_some());
    }

    #[test]
    fn debug_does_not_reveal_token() {
        let credential = Credential::new("very-secret-token").unwrap();
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("very-secret-token"));
    }

    #[test]
    fn to_cookie_targets_provider_domain() {
        let cookie = Credential::new("tok").unwrap().to_cookie();
        assert_eq!(cookie.name, "user_session");
        assert_eq!(cookie.domain, "github.com");
        assert_eq!(cookie.value, "tok");
    }

    #[test]
    fn from_cookies_ignores_other_domains_and_names() {
        let jar = vec![
            cookie("user_session", "wrong-site", "claw.cloud"),
            cookie("logged_in", "yes", ".github.com"),
            cookie("user_session", "live", ".github.com"),
        ];
        let credential = Credential::from_cookies(&jar).unwrap();
        assert_eq!(credential.expose(), "live");

        let jar = vec![cookie("user_session", "x", "notgithub.com")];
        assert!(Credential::from_cookies(&jar).is_none());
    }
}
