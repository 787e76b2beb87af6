//! DNS label sanitization.
//!
//! Cluster state carries arbitrary UTF-8 strings (framework names, task
//! names, discovery metadata) that must be mapped onto valid DNS labels
//! before they can appear in a zone. Two schemes are supported: RFC 1123
//! (hostnames may start with a digit) and the stricter RFC 952 (must start
//! with a letter). Both are pure per-label functions.

/// Separator between labels in a domain name.
pub const SEP: &str = ".";

/// Maximum length of a single DNS label in octets.
const MAX_LABEL: usize = 63;

/// Label syntax scheme applied to strings interpolated into DNS names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelScheme {
    /// RFC 1123: `[a-z0-9-]`, may start with a digit.
    Rfc1123,
    /// RFC 952: `[a-z0-9-]`, must start with a letter.
    Rfc952,
}

impl LabelScheme {
    /// Map an arbitrary string onto a valid label under this scheme.
    ///
    /// Lower-cases, drops unsupported code points, trims forbidden leading
    /// characters, truncates to 63 octets and trims trailing hyphens. The
    /// result may be empty when nothing valid remains.
    pub fn apply(self, label: &str) -> String {
        let mut out: String = label
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
            .collect();

        let leading: &[char] = match self {
            LabelScheme::Rfc1123 => &['-'],
            LabelScheme::Rfc952 => &['-', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9'],
        };
        out = out.trim_start_matches(leading).to_string();
        out.truncate(MAX_LABEL);
        out.trim_end_matches('-').to_string()
    }

    /// Sanitize a multi-label string, dropping labels that sanitize to
    /// nothing. `"Some.Framework"` becomes `"some.framework"`, and a name
    /// that is entirely invalid collapses to the empty string.
    pub fn domain_frag(self, s: &str) -> String {
        s.split(SEP)
            .map(|l| self.apply(l))
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(SEP)
    }

    /// Sanitize each label of a multi-label string, preserving label count.
    /// Used for context values where the caller decides what an empty
    /// label means.
    pub fn each_label(self, s: &str) -> String {
        s.split(SEP)
            .map(|l| self.apply(l))
            .collect::<Vec<_>>()
            .join(SEP)
    }
}
