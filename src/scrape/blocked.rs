/// Tokens that mark anti-bot shell pages and access-denied responses.
pub const BLOCK_TOKENS: &[&str] = &["access denied", "forbidden", "blocked", "captcha", "error"];

/// Tokens checked against title/description to decide whether an extraction
/// captured a block page instead of real content. Narrower than the body
/// scan to avoid flagging pages that merely discuss errors.
pub const TITLE_BLOCK_TOKENS: &[&str] = &["403", "forbidden", "blocked", "captcha", "error"];

/// Whole-body heuristic: does this response look like an anti-bot page?
pub fn looks_blocked(body: &str) -> bool {
    let body = body.to_lowercase();
    BLOCK_TOKENS.iter().any(|token| body.contains(token))
}

/// Title-scoped variant for stricter call sites.
pub fn text_blockish(text: &str) -> bool {
    let text = text.to_lowercase();
    TITLE_BLOCK_TOKENS.iter().any(|token| text.contains(token))
}
