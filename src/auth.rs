use std::fmt;

use axum::http::HeaderMap;

use crate::limits::MAX_ID_LEN;
use crate::policy::{Actor, Role};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const USER_DEPARTMENT_HEADER: &str = "x-user-department";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    MissingHeader(&'static str),
    InvalidHeader(&'static str),
    UnknownRole(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "missing bearer token"),
            AuthError::InvalidToken => write!(f, "invalid bearer token"),
            AuthError::MissingHeader(name) => write!(f, "missing {name} header"),
            AuthError::InvalidHeader(name) => write!(f, "invalid {name} header"),
            AuthError::UnknownRole(role) => write!(f, "unknown role: {role}"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Resolves the caller from request headers.
///
/// Identity is asserted by the fronting gateway through the `x-user-*` headers.
/// With a token configured, the gateway must also present it as a bearer token.
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    token: Option<String>,
}

impl Authenticator {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Actor, AuthError> {
        if let Some(expected) = &self.token {
            let presented = header(headers, "authorization")?
                .ok_or(AuthError::MissingToken)?;
            let presented = presented
                .strip_prefix("Bearer ")
                .ok_or(AuthError::InvalidToken)?;
            if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
                return Err(AuthError::InvalidToken);
            }
        }

        let id = header(headers, USER_ID_HEADER)?
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(AuthError::MissingHeader(USER_ID_HEADER))?;
        if id.len() > MAX_ID_LEN {
            return Err(AuthError::InvalidHeader(USER_ID_HEADER));
        }
        let role: Role = header(headers, USER_ROLE_HEADER)?
            .ok_or(AuthError::MissingHeader(USER_ROLE_HEADER))?
            .parse()
            .map_err(AuthError::UnknownRole)?;
        let department = header(headers, USER_DEPARTMENT_HEADER)?
            .map(str::trim)
            .filter(|d| !d.is_empty());
        if department.is_some_and(|d| d.len() > MAX_ID_LEN) {
            return Err(AuthError::InvalidHeader(USER_DEPARTMENT_HEADER));
        }

        Ok(Actor::new(id, role, department.map(str::to_string)))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, AuthError> {
    match headers.get(name) {
        None => Ok(None),
        Some(v) => v.to_str().map(Some).map_err(|_| AuthError::InvalidHeader(name)),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum::http::header::AUTHORIZATION;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn resolves_actor_from_headers() {
        let auth = Authenticator::new(None);
        let actor = auth
            .authenticate(&headers(&[
                (USER_ID_HEADER, "alice"),
                (USER_ROLE_HEADER, "Student"),
                (USER_DEPARTMENT_HEADER, "physics"),
            ]))
            .unwrap();
        assert_eq!(actor, Actor::new("alice", Role::Student, Some("physics".into())));
    }

    #[test]
    fn department_is_optional() {
        let auth = Authenticator::new(None);
        let actor = auth
            .authenticate(&headers(&[(USER_ID_HEADER, "root"), (USER_ROLE_HEADER, "admin")]))
            .unwrap();
        assert_eq!(actor.department_id, None);
        assert!(actor.is_admin());
    }

    #[test]
    fn missing_identity() {
        let auth = Authenticator::new(None);
        assert_eq!(
            auth.authenticate(&headers(&[(USER_ROLE_HEADER, "admin")])),
            Err(AuthError::MissingHeader(USER_ID_HEADER))
        );
        assert_eq!(
            auth.authenticate(&headers(&[(USER_ID_HEADER, "  ")])),
            Err(AuthError::MissingHeader(USER_ID_HEADER))
        );
        assert_eq!(
            auth.authenticate(&headers(&[(USER_ID_HEADER, "alice")])),
            Err(AuthError::MissingHeader(USER_ROLE_HEADER))
        );
        assert!(matches!(
            auth.authenticate(&headers(&[(USER_ID_HEADER, "alice"), (USER_ROLE_HEADER, "dean")])),
            Err(AuthError::UnknownRole(_))
        ));
    }

    #[test]
    fn bearer_token_enforced_when_configured() {
        let auth = Authenticator::new(Some("s3cret".into()));
        let identity = [(USER_ID_HEADER, "alice"), (USER_ROLE_HEADER, "student")];

        assert_eq!(auth.authenticate(&headers(&identity)), Err(AuthError::MissingToken));

        let mut wrong = headers(&identity);
        wrong.insert(AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert_eq!(auth.authenticate(&wrong), Err(AuthError::InvalidToken));

        let mut basic = headers(&identity);
        basic.insert(AUTHORIZATION, HeaderValue::from_static("Basic s3cret"));
        assert_eq!(auth.authenticate(&basic), Err(AuthError::InvalidToken));

        let mut ok = headers(&identity);
        ok.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(auth.authenticate(&ok).is_ok());
    }

    #[test]
    fn empty_token_disables_check() {
        let auth = Authenticator::new(Some(String::new()));
        assert!(
            auth.authenticate(&headers(&[(USER_ID_HEADER, "alice"), (USER_ROLE_HEADER, "teacher")]))
                .is_ok()
        );
    }
}
