use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a session token before it's considered expired (24 hours).
const MAX_SESSION_AGE_SECS: i64 = 86400;

/// Key-derivation context, so a leaked signature cannot be replayed against
/// another service sharing the same secret.
const KEY_CONTEXT: &[u8] = b"PraxisSession";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Consultant,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Consultant => "consultant",
            Role::Admin => "admin",
        }
    }

    fn parse(s: &str) -> Option<Role> {
        match s {
            "client" => Some(Role::Client),
            "consultant" => Some(Role::Consultant),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// The authenticated actor as the identity provider reports it. The core
/// trusts this without independent verification.
#[derive(Debug, Clone, Copy)]
pub struct SessionUser {
    pub id: i64,
    pub role: Role,
}

fn signing_key(secret: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(KEY_CONTEXT).expect("HMAC can take key of any size");
    mac.update(secret.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn signature_for(params: &BTreeMap<String, String>, secret: &str) -> String {
    // data-check-string: sorted key=value pairs, excluding sig
    let data_check_string: String = params
        .iter()
        .filter(|(k, _)| k.as_str() != "sig")
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    let key = signing_key(secret);
    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC can take key of any size");
    mac.update(data_check_string.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Validates a signed session token and extracts the actor.
/// Token format: form-urlencoded `uid`, `role`, `issued_at`, `sig`.
pub fn validate_token(token: &str, secret: &str) -> Option<SessionUser> {
    let params: BTreeMap<String, String> = url::form_urlencoded::parse(token.as_bytes())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let sig = params.get("sig")?;

    // Reject stale tokens (prevents replay of captured ones)
    let issued_at: i64 = params.get("issued_at")?.parse().ok()?;
    let now = chrono::Utc::now().timestamp();
    if (now - issued_at) > MAX_SESSION_AGE_SECS {
        tracing::warn!("session token expired: issued_at={}, age={}s", issued_at, now - issued_at);
        return None;
    }

    let computed = signature_for(&params, secret);
    if computed != *sig {
        tracing::warn!("session token signature mismatch");
        return None;
    }

    let id: i64 = params.get("uid")?.parse().ok()?;
    let role = Role::parse(params.get("role")?)?;
    Some(SessionUser { id, role })
}

/// Mint a signed token. The identity provider does this in production; the
/// server itself only ever validates, but tests and ops tooling mint here.
pub fn sign_token(uid: i64, role: Role, issued_at: i64, secret: &str) -> String {
    let mut params = BTreeMap::new();
    params.insert("uid".to_string(), uid.to_string());
    params.insert("role".to_string(), role.as_str().to_string());
    params.insert("issued_at".to_string(), issued_at.to_string());
    let sig = signature_for(&params, secret);
    format!("issued_at={}&role={}&sig={}&uid={}", issued_at, role.as_str(), sig, uid)
}

/// Extract the actor from the Authorization header.
/// Header format: `Bearer <token>`
pub fn extract_user_from_header(auth_header: &str, secret: &str) -> Option<SessionUser> {
    let token = auth_header.strip_prefix("Bearer ")?;
    validate_token(token, secret)
}

/// Whether the actor may use the consultant surface.
pub fn is_consultant(user: &SessionUser) -> bool {
    matches!(user.role, Role::Consultant | Role::Admin)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    #[test]
    fn test_sign_validate_round_trip() {
        let token = sign_token(42, Role::Client, now(), SECRET);
        let user = validate_token(&token, SECRET).expect("valid token");
        assert_eq!(user.id, 42);
        assert_eq!(user.role, Role::Client);
    }

    #[test]
    fn test_tampered_uid_rejected() {
        let token = sign_token(42, Role::Client, now(), SECRET);
        let forged = token.replace("uid=42", "uid=43");
        assert!(validate_token(&forged, SECRET).is_none());
    }

    #[test]
    fn test_role_escalation_rejected() {
        let token = sign_token(42, Role::Client, now(), SECRET);
        let forged = token.replace("role=client", "role=admin");
        assert!(validate_token(&forged, SECRET).is_none());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = sign_token(42, Role::Client, now(), SECRET);
        assert!(validate_token(&token, "other-secret").is_none());
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = sign_token(42, Role::Client, now() - MAX_SESSION_AGE_SECS - 10, SECRET);
        assert!(validate_token(&token, SECRET).is_none());
    }

    #[test]
    fn test_missing_sig_rejected() {
        assert!(validate_token("uid=42&role=client&issued_at=0", SECRET).is_none());
    }

    #[test]
    fn test_header_extraction() {
        let token = sign_token(7, Role::Consultant, now(), SECRET);
        let header = format!("Bearer {}", token);
        let user = extract_user_from_header(&header, SECRET).expect("valid header");
        assert_eq!(user.id, 7);
        assert!(is_consultant(&user));
    }

    #[test]
    fn test_header_without_bearer_prefix_rejected() {
        let token = sign_token(7, Role::Consultant, now(), SECRET);
        assert!(extract_user_from_header(&token, SECRET).is_none());
    }

    #[test]
    fn test_client_is_not_consultant() {
        let user = SessionUser { id: 1, role: Role::Client };
        assert!(!is_consultant(&user));
        let admin = SessionUser { id: 1, role: Role::Admin };
        assert!(is_consultant(&admin));
    }
}
