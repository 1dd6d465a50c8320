//! Session-bound anti-forgery tokens.

use rand::RngCore;

use crate::security::session::Session;

/// Issues and checks the one live CSRF token of a session.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsrfTokenManager;

impl CsrfTokenManager {
    pub fn new() -> Self {
        Self
    }

    /// Current token, issuing one on first access.
    pub fn generate_token(&self, session: &mut Session) -> String {
        if let Some(token) = session.data().csrf_token.as_ref().filter(|t| !t.is_empty()) {
            return token.clone();
        }
        self.regenerate_token(session)
    }

    /// Replace the token; the previous value stops validating.
    pub fn regenerate_token(&self, session: &mut Session) -> String {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        session.data_mut().csrf_token = Some(token.clone());
        token
    }

    /// Exact match against the session token. Empty or missing on either side is invalid.
    pub fn validate_token(&self, session: &Session, candidate: Option<&str>) -> bool {
        let Some(stored) = session.data().csrf_token.as_deref().filter(|t| !t.is_empty()) else {
            return false;
        };
        match candidate {
            Some(candidate) if !candidate.is_empty() => constant_time_eq(stored, candidate),
            _ => false,
        }
    }
}

/// Compare without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
