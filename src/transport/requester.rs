//! Extract the requesting identity from headers set by the fronting auth layer.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts, http::HeaderMap};

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "X-User-Id";
/// Header carrying the user's role; `admin` grants admin visibility and ownership bypass.
pub const USER_ROLE_HEADER: &str = "X-User-Role";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Requester {
    pub id: Option<String>,
    pub is_admin: bool,
}

impl Requester {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(id: impl Into<String>) -> Self {
        Requester {
            id: Some(id.into()),
            is_admin: false,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Requester {
            id: Some(id.into()),
            is_admin: true,
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let id = header(USER_ID_HEADER);
        let is_admin = id.is_some()
            && header(USER_ROLE_HEADER)
                .map(|role| role.eq_ignore_ascii_case("admin"))
                .unwrap_or(false);
        Requester { id, is_admin }
    }

    /// True when the requester may touch a record owned by `owner`.
    pub fn owns(&self, owner: Option<&str>) -> bool {
        self.is_admin || matches!((self.id.as_deref(), owner), (Some(me), Some(o)) if me == o)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Requester
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Requester::from_headers(&parts.headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn role_without_id_is_not_admin() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("admin"));
        assert_eq!(Requester::from_headers(&headers), Requester::anonymous());

        headers.insert(USER_ID_HEADER, HeaderValue::from_static(" u1 "));
        assert_eq!(Requester::from_headers(&headers), Requester::admin("u1"));
    }

    #[test]
    fn ownership() {
        assert!(Requester::user("a").owns(Some("a")));
        assert!(!Requester::user("a").owns(Some("b")));
        assert!(!Requester::user("a").owns(None));
        assert!(Requester::admin("root").owns(Some("b")));
        assert!(!Requester::anonymous().owns(None));
    }
}
