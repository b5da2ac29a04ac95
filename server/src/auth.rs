use crate::config::Config;
use crate::db::{new_id, now_ms};
use crate::error::{is_unique_violation, DomainError, DomainResult};
use crate::outbox::{append_event, NewEvent};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

/// The authenticated principal a connection carries between frames.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub roles: Vec<String>,
}

impl AuthUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: String,
    pub expires_in_sec: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    sid: String,
    tv: i64,
    exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct RefreshClaims {
    sub: String,
    sid: String,
    tv: i64,
    exp: i64,
}

#[derive(Clone)]
pub struct AuthService {
    pool: SqlitePool,
    access_secret: String,
    refresh_secret: String,
    access_ttl: i64,
    refresh_ttl: i64,
    demo_start_atomic: i64,
    referral_bonus_atomic: i64,
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

impl AuthService {
    pub fn new(pool: SqlitePool, config: &Config) -> Self {
        Self {
            pool,
            access_secret: config.jwt_access_secret.clone(),
            refresh_secret: config.jwt_refresh_secret.clone(),
            access_ttl: config.access_ttl_seconds,
            refresh_ttl: config.refresh_ttl_seconds,
            demo_start_atomic: config.demo_start_atomic(),
            referral_bonus_atomic: config.referral_bonus_atomic(),
        }
    }

    /// Create the account with its demo balance, seed the wallet ledger so
    /// balances always reconcile against it, and log the user in.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        ref_code: Option<&str>,
    ) -> DomainResult<(AuthUser, AuthTokens)> {
        let username = username.trim();
        if username.len() < 3 || username.len() > 24 {
            return Err(DomainError::validation("username must be 3-24 characters"));
        }
        if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DomainError::validation(
                "username may only contain letters, digits and underscore",
            ));
        }
        if password.len() < 6 {
            return Err(DomainError::validation("password must be at least 6 characters"));
        }

        let password_hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .map_err(|err| DomainError::internal(err.to_string()))?;

        let referrer: Option<String> = match ref_code {
            Some(code) if !code.is_empty() => {
                sqlx::query("SELECT id FROM users WHERE affiliate_code = ?")
                    .bind(code)
                    .fetch_optional(&self.pool)
                    .await?
                    .map(|row| row.get("id"))
            }
            _ => None,
        };

        let user_id = new_id();
        let affiliate_code = new_id().chars().filter(|c| *c != '-').take(8).collect::<String>();
        let bonus_start = if referrer.is_some() {
            self.referral_bonus_atomic
        } else {
            0
        };
        let now = now_ms();

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO users
                (id, username, password_hash, roles, balance_main, balance_bonus,
                 state_version, token_version, affiliate_code, referred_by,
                 created_at, updated_at)
             VALUES (?, ?, ?, '[\"user\"]', ?, ?, 1, 0, ?, ?, ?, ?)",
        )
        .bind(&user_id)
        .bind(username)
        .bind(&password_hash)
        .bind(self.demo_start_atomic)
        .bind(bonus_start)
        .bind(&affiliate_code)
        .bind(referrer.as_deref())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(DomainError::conflict("username already taken"))
            }
            Err(err) => return Err(err.into()),
        }

        sqlx::query(
            "INSERT INTO wallet_ledger
                (id, user_id, request_id, type, amount_main, amount_bonus,
                 balance_main_after, balance_bonus_after, metadata, created_at)
             VALUES (?, ?, NULL, 'deposit', ?, ?, ?, ?, ?, ?)",
        )
        .bind(new_id())
        .bind(&user_id)
        .bind(self.demo_start_atomic)
        .bind(bonus_start)
        .bind(self.demo_start_atomic)
        .bind(bonus_start)
        .bind(serde_json::json!({ "demo": true, "referral": referrer.is_some() }).to_string())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        append_event(
            &mut *tx,
            NewEvent {
                event_type: "auth.user.registered".to_string(),
                aggregate_type: "user".to_string(),
                aggregate_id: user_id.clone(),
                version: 1,
                user_id: Some(user_id.clone()),
                payload: serde_json::json!({ "username": username }),
            },
        )
        .await?;
        tx.commit().await?;

        // Referrer counters ride a separate update; losing it never fails
        // the registration.
        if let Some(referrer_id) = &referrer {
            let bumped = sqlx::query(
                "UPDATE users SET referral_count = referral_count + 1, updated_at = ? WHERE id = ?",
            )
            .bind(now_ms())
            .bind(referrer_id)
            .execute(&self.pool)
            .await;
            if let Err(err) = bumped {
                log::warn!("failed to bump referral counter for {referrer_id}: {err}");
            }
        }

        let user = AuthUser {
            id: user_id,
            username: username.to_string(),
            roles: vec!["user".to_string()],
        };
        let tokens = self.open_session(&user.id, 0).await?;
        Ok((user, tokens))
    }

    pub async fn login(&self, username: &str, password: &str) -> DomainResult<(AuthUser, AuthTokens)> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, roles, token_version FROM users
             WHERE username = ? COLLATE NOCASE",
        )
        .bind(username.trim())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DomainError::unauthorized("invalid credentials"))?;

        let password_hash: String = row.get("password_hash");
        let valid = bcrypt::verify(password, &password_hash)
            .map_err(|err| DomainError::internal(err.to_string()))?;
        if !valid {
            return Err(DomainError::unauthorized("invalid credentials"));
        }

        let user = AuthUser {
            id: row.get("id"),
            username: row.get("username"),
            roles: parse_roles(row.get("roles")),
        };
        let token_version: i64 = row.get("token_version");
        let tokens = self.open_session(&user.id, token_version).await?;
        Ok((user, tokens))
    }

    async fn open_session(&self, user_id: &str, token_version: i64) -> DomainResult<AuthTokens> {
        let session_id = new_id();
        let now = now_ms();
        let expires_at = now + self.refresh_ttl * 1000;
        let tokens = self.issue_tokens(user_id, &session_id, token_version)?;

        sqlx::query(
            "INSERT INTO sessions (id, user_id, refresh_token_hash, expires_at, revoked, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&session_id)
        .bind(user_id)
        .bind(sha256_hex(&tokens.refresh_token))
        .bind(expires_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(tokens)
    }

    fn issue_tokens(
        &self,
        user_id: &str,
        session_id: &str,
        token_version: i64,
    ) -> DomainResult<AuthTokens> {
        let now_sec = now_ms() / 1000;
        let access = encode(
            &Header::default(),
            &AccessClaims {
                sub: user_id.to_string(),
                sid: session_id.to_string(),
                tv: token_version,
                exp: now_sec + self.access_ttl,
            },
            &EncodingKey::from_secret(self.access_secret.as_bytes()),
        )
        .map_err(|err| DomainError::internal(err.to_string()))?;
        let refresh = encode(
            &Header::default(),
            &RefreshClaims {
                sub: user_id.to_string(),
                sid: session_id.to_string(),
                tv: token_version,
                exp: now_sec + self.refresh_ttl,
            },
            &EncodingKey::from_secret(self.refresh_secret.as_bytes()),
        )
        .map_err(|err| DomainError::internal(err.to_string()))?;

        Ok(AuthTokens {
            access_token: access,
            refresh_token: refresh,
            session_id: session_id.to_string(),
            expires_in_sec: self.access_ttl,
        })
    }

    /// Validate an access token against its user row. A stale
    /// `token_version` (global revoke) rejects the token even before `exp`.
    pub async fn validate_access(&self, token: &str) -> DomainResult<AuthUser> {
        let claims = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.access_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| DomainError::unauthorized("invalid access token"))?
        .claims;

        let row = sqlx::query("SELECT id, username, roles, token_version FROM users WHERE id = ?")
            .bind(&claims.sub)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DomainError::unauthorized("invalid access token"))?;

        let token_version: i64 = row.get("token_version");
        if token_version != claims.tv {
            return Err(DomainError::unauthorized("token revoked"));
        }
        Ok(AuthUser {
            id: row.get("id"),
            username: row.get("username"),
            roles: parse_roles(row.get("roles")),
        })
    }

    /// Rotate a refresh token. The stored hash must match the presented
    /// token, so reusing a rotated token fails and signals theft.
    pub async fn refresh(&self, refresh_token: &str) -> DomainResult<AuthTokens> {
        let claims = decode::<RefreshClaims>(
            refresh_token,
            &DecodingKey::from_secret(self.refresh_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| DomainError::unauthorized("invalid refresh token"))?
        .claims;

        let session = sqlx::query(
            "SELECT id, user_id, refresh_token_hash, expires_at, revoked FROM sessions WHERE id = ?",
        )
        .bind(&claims.sid)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DomainError::unauthorized("session not found"))?;

        let revoked: i64 = session.get("revoked");
        let expires_at: i64 = session.get("expires_at");
        let stored_hash: String = session.get("refresh_token_hash");
        if revoked != 0 || expires_at <= now_ms() {
            return Err(DomainError::unauthorized("session expired"));
        }
        if stored_hash != sha256_hex(refresh_token) {
            return Err(DomainError::unauthorized("refresh token reuse detected"));
        }

        let user = sqlx::query("SELECT token_version FROM users WHERE id = ?")
            .bind(&claims.sub)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DomainError::unauthorized("user not found"))?;
        let token_version: i64 = user.get("token_version");
        if token_version != claims.tv {
            return Err(DomainError::unauthorized("token revoked"));
        }

        let tokens = self.issue_tokens(&claims.sub, &claims.sid, token_version)?;
        sqlx::query(
            "UPDATE sessions SET refresh_token_hash = ?, expires_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(sha256_hex(&tokens.refresh_token))
        .bind(now_ms() + self.refresh_ttl * 1000)
        .bind(now_ms())
        .bind(&claims.sid)
        .execute(&self.pool)
        .await?;
        Ok(tokens)
    }

    pub async fn logout(&self, user_id: &str, session_id: &str) -> DomainResult<()> {
        sqlx::query(
            "UPDATE sessions SET revoked = 1, updated_at = ? WHERE id = ? AND user_id = ?",
        )
        .bind(now_ms())
        .bind(session_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn sessions_list(&self, user_id: &str) -> DomainResult<serde_json::Value> {
        let rows = sqlx::query(
            "SELECT id, expires_at, revoked, created_at FROM sessions
             WHERE user_id = ? ORDER BY created_at DESC LIMIT 50",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        let sessions: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                serde_json::json!({
                    "id": row.get::<String, _>("id"),
                    "expiresAt": row.get::<i64, _>("expires_at"),
                    "revoked": row.get::<i64, _>("revoked") != 0,
                    "createdAt": row.get::<i64, _>("created_at"),
                })
            })
            .collect();
        Ok(serde_json::json!({ "sessions": sessions }))
    }

    pub async fn me(&self, user_id: &str) -> DomainResult<serde_json::Value> {
        let row = sqlx::query(
            "SELECT id, username, roles, balance_main, balance_bonus, state_version,
                    affiliate_code, referral_count, referral_earnings, created_at
             FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DomainError::not_found("user not found"))?;
        Ok(serde_json::json!({
            "id": row.get::<String, _>("id"),
            "username": row.get::<String, _>("username"),
            "roles": parse_roles(row.get("roles")),
            "balance": {
                "main": row.get::<i64, _>("balance_main"),
                "bonus": row.get::<i64, _>("balance_bonus"),
            },
            "stateVersion": row.get::<i64, _>("state_version"),
            "affiliateCode": row.get::<Option<String>, _>("affiliate_code"),
            "referralCount": row.get::<i64, _>("referral_count"),
            "referralEarnings": row.get::<i64, _>("referral_earnings"),
            "createdAt": row.get::<i64, _>("created_at"),
        }))
    }
}

fn parse_roles(raw: String) -> Vec<String> {
    serde_json::from_str(&raw).unwrap_or_else(|_| vec!["user".to_string()])
}
