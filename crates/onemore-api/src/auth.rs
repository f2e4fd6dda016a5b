use anyhow::Result;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use onemore_types::models::Claims;

/// Anonymous tokens are long-lived; the identity is meant to survive app
/// restarts for as long as the device keeps the token.
pub const TOKEN_TTL_DAYS: i64 = 365;

pub fn issue_token(secret: &str, user_id: Uuid) -> Result<String> {
    let claims = Claims {
        sub: user_id,
        anonymous: true,
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}
