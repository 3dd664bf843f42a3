use crate::config::SecurityConfig;
use crate::error::{HookError, Result};
use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};
use std::net::IpAddr;

/// Client allow-list and bearer check, applied before any relay work.
#[derive(Debug, Clone)]
pub struct AccessGuard {
    allowed_ips: Vec<IpAddr>,
    require_auth: bool,
    token_digest: Option<[u8; 32]>,
}

impl AccessGuard {
    pub fn new(security: &SecurityConfig, auth_token: &str) -> Self {
        let token_digest = (!auth_token.is_empty()).then(|| digest(auth_token));
        Self {
            allowed_ips: security.allowed_ips.iter().map(|ip| ip.to_canonical()).collect(),
            require_auth: security.require_auth,
            token_digest,
        }
    }

    /// Fails closed: auth required without a configured token rejects everyone.
    pub fn check(&self, client: IpAddr, headers: &HeaderMap) -> Result<()> {
        if !self.allowed_ips.is_empty() && !self.allowed_ips.contains(&client.to_canonical()) {
            return Err(HookError::Auth);
        }
        if !self.require_auth {
            return Ok(());
        }

        let expected = self.token_digest.ok_or(HookError::Auth)?;
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(HookError::Auth)?;

        if digest(presented.trim()) == expected {
            Ok(())
        } else {
            Err(HookError::Auth)
        }
    }
}

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

/// Short SHA-256 prefix, safe to log in place of the token.
pub fn fingerprint(token: &str) -> String {
    hex::encode(&digest(token)[..6])
}
