use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::Error};
use uuid::Uuid;

use crate::model::role::Role;
use crate::models::Claims;

fn now() -> usize {
    Utc::now().timestamp().max(0) as usize
}

pub fn encode_claims(claims: &Claims, secret: &str) -> Result<String, Error> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn generate_access_token(
    user_id: &str,
    email: &str,
    role: Role,
    secret: &str,
    ttl: usize,
) -> Result<String, Error> {
    let claims = Claims {
        user_id: user_id.to_string(),
        sub: email.to_string(),
        role: role.id(),
        exp: now() + ttl,
        jti: Uuid::new_v4().to_string(),
    };
    encode_claims(&claims, secret)
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::errors::ErrorKind;

    #[test]
    fn issued_token_verifies() {
        let token = generate_access_token("U7", "t@school.org", Role::Teacher, "s3cret", 60).unwrap();
        let claims = verify_token(&token, "s3cret").unwrap();
        assert_eq!(claims.user_id, "U7");
        assert_eq!(claims.sub, "t@school.org");
        assert_eq!(Role::from_id(claims.role), Some(Role::Teacher));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_access_token("U7", "t@school.org", Role::Admin, "s3cret", 60).unwrap();
        assert!(verify_token(&token, "other").is_err());
    }

    #[test]
    fn expired_token_reports_expiry() {
        let claims = Claims {
            user_id: "U1".to_string(),
            sub: "a@b.org".to_string(),
            role: Role::Admin.id(),
            exp: now() - 3_600,
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode_claims(&claims, "s3cret").unwrap();
        let err = verify_token(&token, "s3cret").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ExpiredSignature));
    }
}
