//! User-adjustable refresh settings.

/// What a refresh fetches besides the user profile.
///
/// Replaced wholesale through `GeocachingClient::set_settings`; a refresh
/// reads it once and never sees a half-applied change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    trackable_codes: Vec<String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the given reference codes. Codes are trimmed; blanks and
    /// duplicates are dropped, first occurrence wins.
    pub fn with_trackables<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut trackable_codes: Vec<String> = Vec::new();
        for code in codes {
            let code = code.as_ref().trim();
            if !code.is_empty() && !trackable_codes.iter().any(|c| c == code) {
                trackable_codes.push(code.to_string());
            }
        }
        Self { trackable_codes }
    }

    /// Parse a comma-separated list such as `"TB1,TB2"`.
    pub fn from_code_list(list: &str) -> Self {
        Self::with_trackables(list.split(','))
    }

    pub fn trackable_codes(&self) -> &[String] {
        &self.trackable_codes
    }

    pub fn tracks_trackables(&self) -> bool {
        !self.trackable_codes.is_empty()
    }
}
