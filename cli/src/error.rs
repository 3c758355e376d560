use serde::Deserialize;

/// Body of a failed API call. Most errors carry only `error`; a push that ran
/// but failed reports `stdout` and `stderr` instead.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorResponse {
    pub error: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl ErrorResponse {
    /// The most useful single line to show an operator.
    pub fn message(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        [&self.stderr, &self.stdout]
            .into_iter()
            .filter_map(|s| s.as_deref().map(str::trim))
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }
}
