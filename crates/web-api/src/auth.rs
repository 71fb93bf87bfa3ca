//! JWT 凭证校验
//!
//! WebSocket `authenticate` 事件和内部 HTTP 接口共用同一套密钥。

use application::{ApplicationError, CredentialVerifier};
use axum::http::HeaderMap;
use config::JwtConfig;
use domain::{Role, UserId};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub role: Role,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 生成 JWT token，供测试和运维脚本使用
    pub fn generate_token(&self, identity: UserId, role: Role) -> Result<String, ApiError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours);
        let claims = Claims {
            sub: identity,
            role,
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("token generation failed: {err}")))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
    }

    /// 从 Authorization 头中提取并验证 token
    pub fn claims_from_headers(&self, headers: &HeaderMap) -> Result<Claims, ApiError> {
        let auth_header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

        self.verify_token(token)
            .map_err(|err| ApiError::unauthorized(format!("Invalid token: {err}")))
    }

    /// 内部接口只接受管理员 token
    pub fn require_admin(&self, headers: &HeaderMap) -> Result<Claims, ApiError> {
        let claims = self.claims_from_headers(headers)?;
        if claims.role != Role::Admin {
            return Err(ApiError::forbidden("admin token required"));
        }
        Ok(claims)
    }
}

impl CredentialVerifier for JwtService {
    fn verify(&self, identity: UserId, credential: &str) -> Result<(), ApplicationError> {
        let claims = self
            .verify_token(credential)
            .map_err(|err| ApplicationError::AuthenticationFailed(format!("invalid token: {err}")))?;
        if claims.sub != identity {
            return Err(ApplicationError::AuthenticationFailed(
                "token subject does not match identity".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn service() -> JwtService {
        JwtService::new(JwtConfig {
            secret: "test-secret-key-with-at-least-32-characters".into(),
            expiration_hours: 1,
        })
    }

    #[test]
    fn issued_token_verifies_for_matching_identity() {
        let jwt = service();
        let identity = UserId::generate();
        let token = jwt.generate_token(identity, Role::Customer).unwrap();

        assert!(jwt.verify(identity, &token).is_ok());
        let err = jwt.verify(UserId::generate(), &token).unwrap_err();
        assert_eq!(err.code(), "AUTHENTICATION_FAILED");
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let other = JwtService::new(JwtConfig {
            secret: "another-secret-key-with-at-least-32-chars".into(),
            expiration_hours: 1,
        });
        let identity = UserId::generate();
        let token = other.generate_token(identity, Role::Customer).unwrap();

        assert!(service().verify(identity, &token).is_err());
        assert!(service().verify(identity, "garbage").is_err());
    }

    #[test]
    fn require_admin_checks_role() {
        let jwt = service();
        let mut headers = HeaderMap::new();
        assert!(jwt.require_admin(&headers).is_err());

        let seller = jwt.generate_token(UserId::generate(), Role::Seller).unwrap();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {seller}")).unwrap(),
        );
        assert!(jwt.require_admin(&headers).is_err());

        let admin = jwt.generate_token(UserId::generate(), Role::Admin).unwrap();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {admin}")).unwrap(),
        );
        assert_eq!(jwt.require_admin(&headers).unwrap().role, Role::Admin);
    }
}
