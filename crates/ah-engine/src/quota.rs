//! Detection of billing/quota exhaustion in agent output.
//!
//! The agent may exit zero or non-zero when the underlying provider refuses
//! work for billing reasons, so the exit code alone cannot classify the
//! condition. Content inspection over the captured output is what turns a
//! run into the distinguished quota-exhausted outcome, which is
//! operator-actionable (add billing credit) rather than a code defect.

/// Vocabulary that marks agent output as a billing/quota refusal.
const QUOTA_MARKERS: &[&str] = &[
    "credit",
    "quota",
    "billing",
    "exceeded",
    "insufficient",
    "rate limit",
    "usage limit",
];

/// Returns the first matched marker, case-insensitively, or `None`.
pub fn quota_marker(output: &str) -> Option<&'static str> {
    let haystack = output.to_ascii_lowercase();
    QUOTA_MARKERS
        .iter()
        .copied()
        .find(|marker| haystack.contains(marker))
}

/// Whether the output indicates quota exhaustion.
pub fn is_quota_exhausted(output: &str) -> bool {
    quota_marker(output).is_some()
}
