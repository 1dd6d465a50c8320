//! Pre-router request inspection.
//!
//! Runs on the raw request before any handler sees it. A request is blocked
//! when any of these hold:
//! - the body exceeds `max_body_bytes` (declared or actual)
//! - a JSON body does not parse, repeats a top-level key, or carries a string
//!   value longer than `max_value_length`
//! - a url-encoded form field is longer than `max_value_length`
//! - the body, path or decoded query matches an attack signature
//!
//! Duplicate keys are found by scanning the raw text: decoders keep the last
//! occurrence, so validation and use could otherwise see different values.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::FirewallConfig;
use crate::observability::{events, SecurityLogger};
use crate::security::context::RequestContext;

/// Built-in attack signatures: (pattern, description).
const BUILTIN_SIGNATURES: &[(&str, &str)] = &[
    (r"(?i)<\s*/?\s*script|%3c\s*/?\s*script", "script tag injection"),
    (r"(?i)\bunion\s+(all\s+)?select\b", "sql union select"),
    (r"(?i)\bdrop\s+table\b", "sql drop table"),
    (r"(?i)'\s*or\s+'?1'?\s*=\s*'?1", "sql tautology"),
    (r"(?i)\$\{\s*jndi\s*:", "jndi lookup"),
    (r"(?i)<\?php", "php open tag"),
    (r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]", "control character smuggling"),
];

#[derive(Debug, Error)]
#[error("invalid signature pattern {pattern:?}: {source}")]
pub struct SignatureError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// One compiled attack pattern.
#[derive(Debug, Clone)]
pub struct Signature {
    pattern: Regex,
    description: String,
}

impl Signature {
    pub fn new(pattern: &str, description: impl Into<String>) -> Result<Self, SignatureError> {
        let pattern = Regex::new(pattern).map_err(|source| SignatureError {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern,
            description: description.into(),
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.pattern.is_match(haystack)
    }
}

/// The built-in table.
pub fn builtin_signatures() -> Vec<Signature> {
    BUILTIN_SIGNATURES
        .iter()
        .filter_map(|(pattern, description)| Signature::new(pattern, *description).ok())
        .collect()
}

/// Why a request was blocked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FirewallViolation {
    #[error("payload exceeds maximum size")]
    BodyTooLarge,
    #[error("invalid JSON body")]
    InvalidJson,
    #[error("duplicate top-level JSON keys")]
    DuplicateKeys,
    #[error("field value too long")]
    ValueTooLong,
    #[error("attack signature matched: {0}")]
    Signature(String),
}

impl FirewallViolation {
    /// Stable code for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            FirewallViolation::BodyTooLarge => "body_too_large",
            FirewallViolation::InvalidJson => "invalid_json",
            FirewallViolation::DuplicateKeys => "duplicate_keys",
            FirewallViolation::ValueTooLong => "value_too_long",
            FirewallViolation::Signature(_) => "attack_signature",
        }
    }

    /// User-facing message.
    pub fn message(&self) -> &'static str {
        match self {
            FirewallViolation::BodyTooLarge => "Payload excede tamaño máximo",
            FirewallViolation::InvalidJson => "JSON inválido",
            FirewallViolation::DuplicateKeys => "Claves duplicadas detectadas",
            FirewallViolation::ValueTooLong => "Campo demasiado largo",
            FirewallViolation::Signature(_) => "Patrón de ataque detectado",
        }
    }
}

/// Request facts the firewall needs beyond the [`RequestContext`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Payload<'a> {
    pub content_type: Option<&'a str>,
    pub content_length: Option<u64>,
    pub body: &'a [u8],
}

pub struct ApiFirewall {
    enabled: bool,
    max_body_bytes: usize,
    max_value_length: usize,
    skip_paths: Vec<String>,
    signatures: Vec<Signature>,
    logger: Arc<SecurityLogger>,
}

impl ApiFirewall {
    pub fn from_config(config: &FirewallConfig, logger: Arc<SecurityLogger>) -> Result<Self, SignatureError> {
        let mut signatures = builtin_signatures();
        for extra in &config.extra_signatures {
            signatures.push(Signature::new(&extra.pattern, extra.description.clone())?);
        }

        Ok(Self {
            enabled: config.enabled,
            max_body_bytes: config.max_body_bytes,
            max_value_length: config.max_value_length,
            skip_paths: config.skip_paths.clone(),
            signatures,
            logger,
        })
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Whether requests to `path` are inspected at all.
    pub fn applies_to(&self, path: &str) -> bool {
        self.enabled && !self.skip_paths.iter().any(|p| p == path)
    }

    /// Inspect a request and log a `payload_suspicious` event when it is blocked.
    pub fn check(&self, ctx: &RequestContext, payload: Payload<'_>) -> Result<(), FirewallViolation> {
        let result = self.inspect(ctx, payload);
        if let Err(violation) = &result {
            self.report(ctx, violation, payload.content_type);
        }
        result
    }

    /// Log a block decided outside [`ApiFirewall::inspect`].
    pub fn report(&self, ctx: &RequestContext, violation: &FirewallViolation, content_type: Option<&str>) {
        let signature = match violation {
            FirewallViolation::Signature(description) => Some(description.as_str()),
            _ => None,
        };
        self.logger.log_event(
            events::PAYLOAD_SUSPICIOUS,
            ctx.trace_id(),
            json!({
                "ip": ctx.client_ip,
                "method": ctx.method.as_str(),
                "path": ctx.path,
                "status": 400,
                "reason": violation.reason(),
                "signature": signature,
                "content_type": content_type,
            }),
        );
    }

    /// Pure inspection without side effects.
    pub fn inspect(&self, ctx: &RequestContext, payload: Payload<'_>) -> Result<(), FirewallViolation> {
        if !self.applies_to(&ctx.path) {
            return Ok(());
        }

        let declared_too_large = payload
            .content_length
            .is_some_and(|len| len > self.max_body_bytes as u64);
        if declared_too_large || payload.body.len() > self.max_body_bytes {
            return Err(FirewallViolation::BodyTooLarge);
        }

        self.scan(&ctx.uri)?;
        if let Some((_, query)) = ctx.uri.split_once('?') {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                self.scan(&key)?;
                self.scan(&value)?;
            }
        }

        if payload.body.is_empty() {
            return Ok(());
        }

        let content_type = payload.content_type.unwrap_or_default().to_ascii_lowercase();
        if content_type.contains("application/json") {
            self.inspect_json(payload.body)?;
        } else if content_type.contains("application/x-www-form-urlencoded") {
            self.inspect_form(payload.body)?;
        }

        self.scan(&String::from_utf8_lossy(payload.body))
    }

    fn inspect_json(&self, body: &[u8]) -> Result<(), FirewallViolation> {
        let value: Value = serde_json::from_slice(body).map_err(|_| FirewallViolation::InvalidJson)?;
        let raw = std::str::from_utf8(body).map_err(|_| FirewallViolation::InvalidJson)?;

        if has_duplicate_top_level_keys(raw) {
            return Err(FirewallViolation::DuplicateKeys);
        }

        let mut strings = Vec::new();
        collect_strings(&value, &mut strings);
        for s in strings {
            if s.len() > self.max_value_length {
                return Err(FirewallViolation::ValueTooLong);
            }
            // Escapes like \u003c only show up decoded.
            self.scan(s)?;
        }
        Ok(())
    }

    fn inspect_form(&self, body: &[u8]) -> Result<(), FirewallViolation> {
        for (key, value) in url::form_urlencoded::parse(body) {
            if value.len() > self.max_value_length {
                return Err(FirewallViolation::ValueTooLong);
            }
            self.scan(&key)?;
            self.scan(&value)?;
        }
        Ok(())
    }

    fn scan(&self, haystack: &str) -> Result<(), FirewallViolation> {
        match self.signatures.iter().find(|s| s.is_match(haystack)) {
            Some(signature) => Err(FirewallViolation::Signature(signature.description.clone())),
            None => Ok(()),
        }
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => {
            for (k, v) in map {
                out.push(k);
                collect_strings(v, out);
            }
        }
        _ => {}
    }
}

/// Scan raw JSON text for a key that appears twice in the top-level object.
///
/// Keys are compared after unescaping, so `"a"` and `"\u0061"` collide.
pub fn has_duplicate_top_level_keys(raw: &str) -> bool {
    if !raw.trim_start().starts_with('{') {
        return false;
    }

    let bytes = raw.as_bytes();
    let mut seen = HashSet::new();
    let mut depth = 0usize;
    let mut expect_key = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                if depth == 1 && expect_key {
                    let end = (i + 1).min(bytes.len());
                    let literal = &raw[start..end];
                    let key = serde_json::from_str::<String>(literal).unwrap_or_else(|_| literal.to_string());
                    if !seen.insert(key) {
                        return true;
                    }
                    expect_key = false;
                }
            }
            b'{' => {
                depth += 1;
                if depth == 1 {
                    expect_key = true;
                }
            }
            b'[' => depth += 1,
            b'}' | b']' => depth = depth.saturating_sub(1),
            b',' if depth == 1 => expect_key = true,
            _ => {}
        }
        i += 1;
    }
    false
}
