//! Canonical backend error classification and operator remediation text.

use std::fmt;

use crate::errors::McpError;

/// Closed set of backend conditions the CLI knows how to advise on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalCode {
    Unauthorized,
    SessionNotFound,
    IndexNotReady,
    FileNotFound,
    PermissionDenied,
    RateLimited,
    PaymentRequired,
}

impl CanonicalCode {
    pub const ALL: [CanonicalCode; 7] = [
        CanonicalCode::Unauthorized,
        CanonicalCode::SessionNotFound,
        CanonicalCode::IndexNotReady,
        CanonicalCode::FileNotFound,
        CanonicalCode::PermissionDenied,
        CanonicalCode::RateLimited,
        CanonicalCode::PaymentRequired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalCode::Unauthorized => "UNAUTHORIZED",
            CanonicalCode::SessionNotFound => "SESSION_NOT_FOUND",
            CanonicalCode::IndexNotReady => "INDEX_NOT_READY",
            CanonicalCode::FileNotFound => "FILE_NOT_FOUND",
            CanonicalCode::PermissionDenied => "PERMISSION_DENIED",
            CanonicalCode::RateLimited => "RATE_LIMIT_EXCEEDED",
            CanonicalCode::PaymentRequired => "PAYMENT_REQUIRED",
        }
    }

    /// Parse a wire code; `RATE_LIMITED` is accepted as an alias.
    pub fn parse(code: &str) -> Option<Self> {
        let normalized = code.trim().to_ascii_uppercase();
        if normalized == "RATE_LIMITED" {
            return Some(CanonicalCode::RateLimited);
        }
        Self::ALL.into_iter().find(|candidate| candidate.as_str() == normalized)
    }

    /// Fixed operator guidance for this condition.
    pub fn remediation(self) -> &'static str {
        match self {
            CanonicalCode::Unauthorized => {
                "Authentication failed (UNAUTHORIZED). Set DIR2MCP_AUTH_TOKEN or refresh your credentials, then retry."
            }
            CanonicalCode::SessionNotFound => "The MCP session was not found. Reconnect to the server and retry your command.",
            CanonicalCode::IndexNotReady => "The index is not ready yet. Wait for indexing to finish, then retry.",
            CanonicalCode::FileNotFound => "The requested file was not found. Verify the path or use list_files/search first.",
            CanonicalCode::PermissionDenied => "Permission denied for this operation. Check server auth/scope and retry.",
            CanonicalCode::RateLimited => "Request rate limit reached. Wait briefly and retry.",
            CanonicalCode::PaymentRequired => "This tool requires payment. Run with x402 enabled or configure a payment token.",
        }
    }
}

impl fmt::Display for CanonicalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PERMISSION_PHRASES: &[&str] = &["PERMISSION_DENIED", "PERMISSION DENIED", "ACCESS DENIED", "FORBIDDEN", "NOT AUTHORIZED"];
const RATE_PHRASES: &[&str] = &["RATE_LIMIT_EXCEEDED", "RATE LIMIT", "TOO MANY REQUESTS"];
const AMBIGUOUS_RATE_PHRASES: &[&str] = &["QUOTA", "LIMIT EXCEEDED", "THROTTLE", "THROTTLED"];
const RATE_CONTEXT_WORDS: &[&str] = &["REQUEST", "API", "RATE", "HTTP", "CALL"];

/// Classify an error. HTTP 402 responses with payment metadata win outright;
/// otherwise the RPC message is inspected before the full rendered error.
pub fn canonical_code_from_error(error: &McpError) -> Option<CanonicalCode> {
    if let Some(rpc) = error.rpc_error() {
        if rpc.is_payment_required() {
            return Some(CanonicalCode::PaymentRequired);
        }
        if let Some(code) = canonical_code_from_text(&rpc.message) {
            return Some(code);
        }
    }
    canonical_code_from_text(&error.to_string())
}

/// Classify free-form error text by whole-token phrase matching.
pub fn canonical_code_from_text(text: &str) -> Option<CanonicalCode> {
    let tokens = canonical_tokens(text);
    if tokens.is_empty() {
        return None;
    }
    let has = |phrase: &str| contains_phrase(&tokens, phrase);
    let has_any = |phrases: &[&str]| phrases.iter().any(|phrase| has(phrase));

    if has("UNAUTHORIZED") || has("UNAUTHENTICATED") {
        return Some(CanonicalCode::Unauthorized);
    }
    if has("SESSION_NOT_FOUND") {
        return Some(CanonicalCode::SessionNotFound);
    }
    if has("INDEX_NOT_READY") {
        return Some(CanonicalCode::IndexNotReady);
    }
    if has("FILE_NOT_FOUND") {
        return Some(CanonicalCode::FileNotFound);
    }
    if has_any(PERMISSION_PHRASES) {
        return Some(CanonicalCode::PermissionDenied);
    }
    if has_any(RATE_PHRASES) {
        return Some(CanonicalCode::RateLimited);
    }
    if has_any(RATE_CONTEXT_WORDS) && has_any(AMBIGUOUS_RATE_PHRASES) {
        return Some(CanonicalCode::RateLimited);
    }
    if has("PAYMENT_REQUIRED") {
        return Some(CanonicalCode::PaymentRequired);
    }
    None
}

/// Guidance for a wire code string; unknown codes map to an empty string.
pub fn actionable_message_for_code(code: &str) -> &'static str {
    CanonicalCode::parse(code).map(CanonicalCode::remediation).unwrap_or("")
}

/// Operator hint for an error, with payment hints appended when the challenge names a requirement.
pub fn hint_for_error(error: &McpError) -> String {
    let Some(code) = canonical_code_from_error(error) else {
        return String::new();
    };
    let mut hint = code.remediation().to_string();
    if code == CanonicalCode::PaymentRequired
        && let Some(suffix) = error
            .rpc_error()
            .and_then(|rpc| rpc.payment_required.as_ref())
            .and_then(|challenge| challenge.primary())
            .and_then(|requirement| requirement.hint_suffix())
    {
        hint.push(' ');
        hint.push_str(&suffix);
    }
    hint
}

fn canonical_tokens(value: &str) -> Vec<String> {
    value
        .trim()
        .to_ascii_uppercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    let phrase_tokens = canonical_tokens(phrase);
    if phrase_tokens.is_empty() || tokens.len() < phrase_tokens.len() {
        return false;
    }
    tokens.windows(phrase_tokens.len()).any(|window| window == phrase_tokens.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RpcError;
    use crate::payment::{PaymentChallenge, PaymentRequirement};

    #[test]
    fn classifies_phrases_and_aliases() {
        let cases = [
            ("backend failure: session not found", Some(CanonicalCode::SessionNotFound)),
            ("request failed: unauthenticated", Some(CanonicalCode::Unauthorized)),
            ("permission denied for this route", Some(CanonicalCode::PermissionDenied)),
            ("rate-limit exceeded; retry later", Some(CanonicalCode::RateLimited)),
            ("api quota exceeded for this request", Some(CanonicalCode::RateLimited)),
            ("disk quota reached for temp files", None),
            ("INDEX_NOT_READY", Some(CanonicalCode::IndexNotReady)),
            ("file-not-found: docs/a.md", Some(CanonicalCode::FileNotFound)),
            ("HTTP 429 Too Many Requests", Some(CanonicalCode::RateLimited)),
            ("payment-required", Some(CanonicalCode::PaymentRequired)),
            ("something else", None),
            ("", None),
        ];
        for (text, expected) in cases {
            assert_eq!(canonical_code_from_text(text), expected, "text: {text:?}");
        }
    }

    #[test]
    fn matching_respects_token_boundaries() {
        assert_eq!(canonical_code_from_text("FORBIDDENFRUIT"), None);
        assert_eq!(canonical_code_from_text("sessionnotfound"), None);
        assert_eq!(canonical_code_from_text("call was throttled"), Some(CanonicalCode::RateLimited));
        assert_eq!(canonical_code_from_text("worker throttled"), None);
    }

    #[test]
    fn earlier_checks_take_precedence() {
        assert_eq!(
            canonical_code_from_text("unauthorized: permission denied"),
            Some(CanonicalCode::Unauthorized)
        );
    }

    #[test]
    fn every_code_has_remediation_and_unknown_is_empty() {
        for code in CanonicalCode::ALL {
            assert!(!actionable_message_for_code(code.as_str()).is_empty(), "{code}");
        }
        assert_eq!(actionable_message_for_code("rate_limited"), CanonicalCode::RateLimited.remediation());
        assert_eq!(actionable_message_for_code("DOES_NOT_EXIST"), "");
    }

    #[test]
    fn payment_metadata_short_circuits_message_matching() {
        let mut rpc = RpcError::new(-32000, "request blocked");
        rpc.http_status = Some(402);
        rpc.payment_required_present = true;
        rpc.payment_required = Some(PaymentChallenge {
            x402_version: 2,
            accepts: vec![PaymentRequirement {
                amount: "100".into(),
                asset: "USD".into(),
                network: "base".into(),
                ..Default::default()
            }],
        });
        let error = McpError::from(rpc);
        assert_eq!(canonical_code_from_error(&error), Some(CanonicalCode::PaymentRequired));
        assert_eq!(
            hint_for_error(&error),
            "This tool requires payment. Run with x402 enabled or configure a payment token. (Hints: amount=100, asset=USD, network=base)"
        );
    }

    #[test]
    fn hint_is_empty_for_unclassified_errors() {
        assert_eq!(hint_for_error(&McpError::transport("connection reset")), "");
    }
}
