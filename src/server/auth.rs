use axum::http::HeaderMap;

use super::config::AuthSection;

/// Access level of a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  User,
  Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
  #[error("Authentication required")]
  MissingToken,
  #[error("Invalid token")]
  InvalidToken,
}

/// Extract a bearer token from the Authorization header
pub fn extract_token_from_headers(headers: &HeaderMap) -> Option<&str> {
  headers
    .get("Authorization")
    .and_then(|v| v.to_str().ok())
    .and_then(|s| s.strip_prefix("Bearer "))
    .map(str::trim)
    .filter(|s| !s.is_empty())
}

fn matches(configured: &Option<String>, token: &str) -> bool {
  configured
    .as_deref()
    .is_some_and(|expected| !expected.is_empty() && expected == token)
}

/// Map the request's bearer token to a role
pub fn authenticate(auth: &AuthSection, headers: &HeaderMap) -> Result<Role, AuthError> {
  if !auth.enabled {
    return Ok(Role::Admin);
  }

  let token = extract_token_from_headers(headers).ok_or(AuthError::MissingToken)?;
  if matches(&auth.admin_token, token) {
    Ok(Role::Admin)
  } else if matches(&auth.user_token, token) {
    Ok(Role::User)
  } else {
    Err(AuthError::InvalidToken)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::http::HeaderValue;

  fn section() -> AuthSection {
    AuthSection {
      enabled: true,
      admin_token: Some("admin-secret".into()),
      user_token: Some("user-secret".into()),
    }
  }

  fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
      "Authorization",
      HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    headers
  }

  #[test]
  fn test_disabled_auth_is_admin() {
    let auth = AuthSection::default();
    assert_eq!(authenticate(&auth, &HeaderMap::new()), Ok(Role::Admin));
  }

  #[test]
  fn test_roles_by_token() {
    assert_eq!(authenticate(&section(), &bearer("admin-secret")), Ok(Role::Admin));
    assert_eq!(authenticate(&section(), &bearer("user-secret")), Ok(Role::User));
    assert_eq!(
      authenticate(&section(), &bearer("nope")),
      Err(AuthError::InvalidToken)
    );
    assert_eq!(
      authenticate(&section(), &HeaderMap::new()),
      Err(AuthError::MissingToken)
    );
  }

  #[test]
  fn test_empty_configured_token_never_matches() {
    let auth = AuthSection {
      enabled: true,
      admin_token: Some(String::new()),
      user_token: None,
    };
    assert_eq!(authenticate(&auth, &bearer("")), Err(AuthError::MissingToken));
    assert_eq!(authenticate(&auth, &bearer("x")), Err(AuthError::InvalidToken));
  }
}
