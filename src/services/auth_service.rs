use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};

const AUTH_COOKIE: &str = "auth_token";

// Get the auth token from request headers: Bearer header first, then the auth cookie
pub fn get_auth_token(headers: &HeaderMap) -> Result<String, String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        let auth_str = auth_header.to_str().map_err(|_| "Invalid Authorization header".to_string())?;
        return Ok(auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).to_string());
    }

    let cookie_header = headers
        .get(header::COOKIE)
        .ok_or_else(|| "Missing Authorization header or Cookie".to_string())?
        .to_str()
        .map_err(|_| "Invalid Cookie header".to_string())?;

    for c in cookie::Cookie::split_parse(cookie_header).flatten() {
        if c.name() == AUTH_COOKIE {
            return Ok(c.value().to_string());
        }
    }
    Err(format!("{} cookie not found", AUTH_COOKIE))
}

// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

// Validate the token and extract the user id from its `sub` claim
pub fn user_id_from_token(token: &str, secret: &str) -> Result<String, String> {
    let token_data = validate_jwt(token, secret).map_err(|e| format!("JWT validation failed: {}", e))?;
    match token_data.claims.get("sub").and_then(|v| v.as_str()) {
        Some(sub) if !sub.is_empty() => Ok(sub.to_string()),
        _ => Err("JWT token does not contain a 'sub' claim".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn token_for(sub: &str, secret: &str) -> String {
        let claims = json!({"sub": sub, "exp": chrono::Utc::now().timestamp() + 3600});
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(header::COOKIE, HeaderValue::from_static("auth_token=xyz"));
        assert_eq!(get_auth_token(&headers).unwrap(), "abc");
    }

    #[test]
    fn cookie_is_used_without_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; auth_token=xyz"));
        assert_eq!(get_auth_token(&headers).unwrap(), "xyz");

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark"));
        assert!(get_auth_token(&headers).is_err());
        assert!(get_auth_token(&HeaderMap::new()).is_err());
    }

    #[test]
    fn sub_claim_becomes_the_user_id() {
        let token = token_for("alice", SECRET);
        assert_eq!(user_id_from_token(&token, SECRET).unwrap(), "alice");
        assert!(user_id_from_token(&token, "other-secret").is_err());
        assert!(user_id_from_token("garbage", SECRET).is_err());
    }
}
