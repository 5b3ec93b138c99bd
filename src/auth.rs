//! Authentication utilities: JWT token management and role checks

use anyhow::{anyhow, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Request;

/// Roles allowed to change data
const WRITE_ROLES: &[&str] = &["admin", "superadmin", "master"];
/// Roles allowed to read data, on top of the write roles
const READ_ONLY_ROLES: &[&str] = &["operator"];

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    pub role: String,
    /// Tenant whose data the caller works on
    pub tenant_id: String,
    /// Issued at (unix timestamp)
    pub iat: usize,
    /// Expiration (unix timestamp)
    pub exp: usize,
}

/// Authentication result from extract_auth
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub user_id: Uuid,
    pub role: String,
    pub tenant_id: Uuid,
}

impl AuthInfo {
    pub fn can_write(&self) -> bool {
        WRITE_ROLES.contains(&self.role.as_str())
    }

    pub fn can_read(&self) -> bool {
        self.can_write() || READ_ONLY_ROLES.contains(&self.role.as_str())
    }
}

/// Generate a JWT access token valid for `ttl_hours`
pub fn generate_token(
    user_id: Uuid,
    role: &str,
    tenant_id: Uuid,
    ttl_hours: u32,
    secret: &str,
) -> Result<String> {
    let now = chrono::Utc::now().timestamp() as usize;
    let exp = now + ttl_hours as usize * 60 * 60;

    let claims = Claims {
        sub: user_id.to_string(),
        role: role.to_string(),
        tenant_id: tenant_id.to_string(),
        iat: now,
        exp,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Validate a JWT token and return claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| anyhow!("Invalid token: {}", e))?;

    Ok(token_data.claims)
}

/// Extract authentication info from a NATS request.
///
/// The token is mandatory; its tenant scopes every query the handler runs.
pub fn extract_auth<T>(request: &Request<T>, jwt_secret: &str) -> Result<AuthInfo> {
    let token = request
        .token
        .as_deref()
        .ok_or_else(|| anyhow!("No authentication provided, JWT token is required"))?;

    let claims = validate_token(token, jwt_secret)?;
    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|e| anyhow!("Invalid user_id in token: {}", e))?;
    let tenant_id = Uuid::parse_str(&claims.tenant_id)
        .map_err(|e| anyhow!("Invalid tenant_id in token: {}", e))?;

    Ok(AuthInfo {
        user_id,
        role: claims.role,
        tenant_id,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Request;
    use chrono::Utc;

    const TEST_SECRET: &str = "test-secret-key-for-jwt-at-least-32-bytes-long";

    fn token_for(role: &str, user_id: Uuid, tenant_id: Uuid) -> String {
        generate_token(user_id, role, tenant_id, 8, TEST_SECRET).unwrap()
    }

    // ---- JWT token tests ----

    #[test]
    fn test_generate_and_validate_token() {
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        let token = token_for("admin", user_id, tenant_id);

        let claims = validate_token(&token, TEST_SECRET).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.tenant_id, tenant_id.to_string());
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.exp - claims.iat, 8 * 60 * 60);
    }

    #[test]
    fn test_validate_token_wrong_secret() {
        let token = token_for("admin", Uuid::new_v4(), Uuid::new_v4());
        assert!(validate_token(&token, "wrong-secret").is_err());
    }

    #[test]
    fn test_validate_token_malformed() {
        assert!(validate_token("not.a.valid.token", TEST_SECRET).is_err());
    }

    // ---- role tests ----

    fn auth(role: &str) -> AuthInfo {
        AuthInfo {
            user_id: Uuid::new_v4(),
            role: role.to_string(),
            tenant_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_write_roles() {
        for role in ["admin", "superadmin", "master"] {
            assert!(auth(role).can_write(), "{} should write", role);
            assert!(auth(role).can_read(), "{} should read", role);
        }
    }

    #[test]
    fn test_operator_is_read_only() {
        assert!(auth("operator").can_read());
        assert!(!auth("operator").can_write());
    }

    #[test]
    fn test_unknown_role_has_no_access() {
        assert!(!auth("guest").can_read());
        assert!(!auth("guest").can_write());
    }

    // ---- extract_auth tests ----

    fn make_request_with_token<T: Default>(token: Option<String>) -> Request<T> {
        Request {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            token,
            payload: T::default(),
        }
    }

    #[test]
    fn test_extract_auth_with_valid_token() {
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        let request = make_request_with_token::<serde_json::Value>(Some(token_for("operator", user_id, tenant_id)));

        let auth = extract_auth(&request, TEST_SECRET).unwrap();
        assert_eq!(auth.user_id, user_id);
        assert_eq!(auth.tenant_id, tenant_id);
        assert_eq!(auth.role, "operator");
    }

    #[test]
    fn test_extract_auth_no_token_fails() {
        let request = make_request_with_token::<serde_json::Value>(None);
        assert!(extract_auth(&request, TEST_SECRET).is_err());
    }

    #[test]
    fn test_extract_auth_invalid_token_fails() {
        let request = make_request_with_token::<serde_json::Value>(Some("bad-token".to_string()));
        assert!(extract_auth(&request, TEST_SECRET).is_err());
    }

    #[test]
    fn test_extract_auth_rejects_bad_tenant_claim() {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            role: "admin".into(),
            tenant_id: "not-a-uuid".into(),
            iat: now,
            exp: now + 60,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(TEST_SECRET.as_bytes())).unwrap();
        let request = make_request_with_token::<serde_json::Value>(Some(token));
        assert!(extract_auth(&request, TEST_SECRET).is_err());
    }
}
