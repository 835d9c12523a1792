//! Session and admin auth: a signed (not encrypted) cookie carrying
//! `{ticket_id, service}`, plus a separate signed admin flag. See
//! SPEC_FULL.md §9.1/§9.2 — this replaces the original's Flask/Redis
//! server-side session with `tower-cookies`' `cookie::Key`-signed jar,
//! the idiomatic axum-ecosystem equivalent that needs no store round
//! trip per request. Signing (not encryption) is enough because the
//! ticket id isn't secret; only tamper-evidence matters.

use serde::{Deserialize, Serialize};
use tower_cookies::cookie::time::Duration;
use tower_cookies::{Cookie, Cookies, Key};

const SESSION_COOKIE: &str = "qc_session";
const ADMIN_COOKIE: &str = "qc_admin";
const COOKIE_MAX_AGE_DAYS: i64 = 30;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub ticket_id: Option<u64>,
    pub service: Option<String>,
}

/// Reads and verifies the session cookie. A missing or tampered cookie
/// is treated as "no session" rather than an error.
#[must_use]
pub fn read_session(cookies: &Cookies, key: &Key) -> SessionState {
    cookies
        .signed(key)
        .get(SESSION_COOKIE)
        .and_then(|cookie| serde_json::from_str(cookie.value()).ok())
        .unwrap_or_default()
}

pub fn write_session(cookies: &Cookies, key: &Key, session: &SessionState) {
    let value = serde_json::to_string(session).expect("SessionState always serializes");
    let cookie = Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .max_age(Duration::days(COOKIE_MAX_AGE_DAYS))
        .build();
    cookies.signed(key).add(cookie);
}

pub fn clear_session(cookies: &Cookies, key: &Key) {
    cookies.signed(key).remove(Cookie::from(SESSION_COOKIE));
}

/// `true` if the request carries a verified admin cookie.
#[must_use]
pub fn is_admin(cookies: &Cookies, key: &Key) -> bool {
    cookies
        .signed(key)
        .get(ADMIN_COOKIE)
        .is_some_and(|cookie| cookie.value() == "1")
}

pub fn set_admin(cookies: &Cookies, key: &Key) {
    let cookie = Cookie::build((ADMIN_COOKIE, "1"))
        .path("/")
        .http_only(true)
        .max_age(Duration::days(COOKIE_MAX_AGE_DAYS))
        .build();
    cookies.signed(key).add(cookie);
}

pub fn clear_admin(cookies: &Cookies, key: &Key) {
    cookies.signed(key).remove(Cookie::from(ADMIN_COOKIE));
}

/// Constant-time string comparison for credential checks, so a login
/// attempt can't be timed to learn the password byte by byte.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Key {
        Key::generate()
    }

    #[test]
    fn constant_time_eq_matches_equal_strings() {
        assert!(constant_time_eq("hunter2", "hunter2"));
        assert!(!constant_time_eq("hunter2", "hunter3"));
        assert!(!constant_time_eq("short", "longer-string"));
    }

    #[test]
    fn session_round_trips_through_a_signed_cookie() {
        let cookies = Cookies::default();
        let key = key();
        let session = SessionState {
            ticket_id: Some(42),
            service: Some("register".to_owned()),
        };
        write_session(&cookies, &key, &session);
        assert_eq!(read_session(&cookies, &key), session);
    }

    #[test]
    fn a_missing_session_cookie_reads_as_default() {
        let cookies = Cookies::default();
        let key = key();
        assert_eq!(read_session(&cookies, &key), SessionState::default());
    }

    #[test]
    fn clearing_a_session_removes_the_binding() {
        let cookies = Cookies::default();
        let key = key();
        write_session(
            &cookies,
            &key,
            &SessionState {
                ticket_id: Some(1),
                service: Some("register".to_owned()),
            },
        );
        clear_session(&cookies, &key);
        assert_eq!(read_session(&cookies, &key), SessionState::default());
    }

    #[test]
    fn admin_flag_is_absent_until_set() {
        let cookies = Cookies::default();
        let key = key();
        assert!(!is_admin(&cookies, &key));
        set_admin(&cookies, &key);
        assert!(is_admin(&cookies, &key));
        clear_admin(&cookies, &key);
        assert!(!is_admin(&cookies, &key));
    }
}
