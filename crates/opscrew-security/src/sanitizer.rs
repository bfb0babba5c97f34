use std::borrow::Cow;

/// Input sanitizer for task descriptions: strips control characters and
/// enforces length limits.
pub struct Sanitizer {
    max_length: usize,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self { max_length: 10_000 }
    }
}

impl Sanitizer {
    /// A sanitizer accepting at most `max_length` characters.
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// The configured length limit.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Sanitize a description: reject blank or oversized input, strip control
    /// characters other than newlines and tabs.
    pub fn sanitize(&self, input: &str) -> SanitizeResult {
        if input.chars().count() > self.max_length {
            return SanitizeResult::Rejected(format!(
                "description exceeds {} characters",
                self.max_length
            ));
        }

        let cleaned = strip_control(input).into_owned();

        if cleaned.trim().is_empty() {
            return SanitizeResult::Rejected("description is empty".to_string());
        }

        if cleaned != input {
            SanitizeResult::Cleaned(cleaned)
        } else {
            SanitizeResult::Clean(cleaned)
        }
    }
}

/// `input` without control characters other than newlines and tabs.
/// Borrows when there is nothing to strip.
pub fn strip_control(input: &str) -> Cow<'_, str> {
    if input.chars().all(is_kept) {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(input.chars().filter(|&c| is_kept(c)).collect())
    }
}

fn is_kept(c: char) -> bool {
    !c.is_control() || matches!(c, '\n' | '\t' | '\r')
}

/// Verdict of [`Sanitizer::sanitize`].
#[derive(Debug, PartialEq)]
pub enum SanitizeResult {
    /// Input was already clean.
    Clean(String),
    /// Input was cleaned (control characters removed).
    Cleaned(String),
    /// Input was rejected entirely.
    Rejected(String),
}

impl SanitizeResult {
    /// Whether the input was refused.
    pub fn is_rejected(&self) -> bool {
        matches!(self, SanitizeResult::Rejected(_))
    }

    /// The accepted text, if any.
    pub fn into_string(self) -> Option<String> {
        match self {
            SanitizeResult::Clean(s) | SanitizeResult::Cleaned(s) => Some(s),
            SanitizeResult::Rejected(_) => None,
        }
    }
}
