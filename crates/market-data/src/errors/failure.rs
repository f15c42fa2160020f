/// Severity classification for a failed provider call.
///
/// Both classes put the failure domain into cooldown. They differ in how far:
///
/// | Class | Cooldown after the failure |
/// |-------|----------------------------|
/// | `Soft` | Follows the doubling curve: `min(base * 2^(streak-1), max)` |
/// | `Hard` | Jumps straight to the domain's maximum cooldown |
///
/// Hard failures (resets, timeouts, 429/403, block pages) usually mean the
/// upstream is actively refusing us, so backing off gradually only earns
/// more penalties.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureClass {
    /// Likely blocking: escalate the cooldown to its maximum.
    Hard,
    /// Transient or payload-level failure: grow the cooldown gradually.
    Soft,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hard => write!(f, "hard"),
            Self::Soft => write!(f, "soft"),
        }
    }
}

const HARD_FAILURE_KEYWORDS: &[&str] = &[
    "remotedisconnected",
    "remote end closed",
    "connection aborted",
    "connection reset",
    "timed out",
    "timeout",
    "too many requests",
    "forbidden",
    "blocked",
];

/// Classify a free-form error description.
///
/// Returns [`FailureClass::Hard`] if the text mentions any of the
/// blocking-related keywords (case-insensitive), otherwise
/// [`FailureClass::Soft`].
pub fn classify_message(message: &str) -> FailureClass {
    let text = message.to_ascii_lowercase();
    if HARD_FAILURE_KEYWORDS.iter().any(|k| text.contains(k)) {
        FailureClass::Hard
    } else {
        FailureClass::Soft
    }
}
