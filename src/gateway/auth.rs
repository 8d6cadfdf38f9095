//! Cookie-based session authentication.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;

use super::error::ApiError;
use super::state::AppState;
use crate::storage::Session;

pub const AUTH_COOKIE: &str = "auth";

/// Authenticated user id, injected by [`auth_middleware`].
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub i64);

/// `Set-Cookie` value for a fresh session. The cookie expires together
/// with the session itself.
pub fn session_cookie(session: &Session) -> String {
    format!(
        "{}={}; Path=/; Expires={}",
        AUTH_COOKIE,
        session.token,
        session.expires_at.format("%a, %d %b %Y %H:%M:%S GMT")
    )
}

fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .map(str::trim)
        .find_map(|pair| {
            pair.strip_prefix(AUTH_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
        })
}

/// Resolves the `auth` cookie to a user id. Absent or unresolvable cookies
/// produce 401; the handler behind this middleware always sees a
/// [`CurrentUser`] extension.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = token_from_headers(request.headers())
        .ok_or(ApiError::Unauthorized)?
        .to_string();

    let user_id = state.store.resolve_session(&token).await?;
    request.extensions_mut().insert(CurrentUser(user_id));

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::{TimeZone, Utc};

    #[test]
    fn cookie_renders_token_path_and_expiry() {
        let session = Session {
            token: "deadbeef".to_string(),
            user_id: 1,
            expires_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap(),
        };

        assert_eq!(
            session_cookie(&session),
            "auth=deadbeef; Path=/; Expires=Sat, 14 Mar 2026 09:26:53 GMT"
        );
    }

    #[test]
    fn token_is_extracted_among_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; auth=cafebabe; lang=en"),
        );
        assert_eq!(token_from_headers(&headers), Some("cafebabe"));

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark"));
        assert_eq!(token_from_headers(&headers), None);
    }
}
