/// Phrases that only show up on challenge, denial, or error pages.
/// Multi-word on purpose: a lone "blocked" or "captcha" appears in real event copy.
const BLOCK_SIGNALS: &[&str] = &[
    "access denied",
    "access to this page has been denied",
    "verify you are human",
    "verify that you are human",
    "are you a robot",
    "checking your browser before accessing",
    "please complete the security check",
    "enable javascript and cookies to continue",
    "attention required! | cloudflare",
    "sorry, you have been blocked",
    "pardon our interruption",
    "unusual traffic from your computer network",
    "request unsuccessful. incapsula incident",
    "403 forbidden",
    "429 too many requests",
    "503 service unavailable",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Ok,
    Blocked,
    Empty,
}

/// Decide whether a "successful" fetch actually returned usable content.
pub fn classify(content: &str, min_len: usize) -> Classification {
    if content.trim().len() < min_len {
        return Classification::Empty;
    }
    let lower = content.to_lowercase();
    if BLOCK_SIGNALS.iter().any(|sig| lower.contains(sig)) {
        return Classification::Blocked;
    }
    Classification::Ok
}

/// The first block signal found, for logs.
pub fn matched_signal(content: &str) -> Option<&'static str> {
    let lower = content.to_lowercase();
    BLOCK_SIGNALS.iter().copied().find(|sig| lower.contains(sig))
}
