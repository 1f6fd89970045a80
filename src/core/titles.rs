use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::MatchError;

/// Longest criterion key the engine accepts
pub const MAX_CRITERION_LEN: usize = 128;

/// Immutable criterion -> display title table
///
/// Built once from configuration and shared read-only by every engine clone.
/// Unknown keys resolve to themselves.
#[derive(Debug, Clone, Default)]
pub struct TitleCatalog {
    titles: Arc<HashMap<String, String>>,
}

impl TitleCatalog {
    pub fn new(titles: HashMap<String, String>) -> Self {
        Self {
            titles: Arc::new(titles),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn resolve<'a>(&'a self, criterion: &'a str) -> &'a str {
        self.titles
            .get(criterion)
            .map(String::as_str)
            .unwrap_or(criterion)
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

impl FromIterator<(String, String)> for TitleCatalog {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Check a criterion key before it reaches the store
pub fn validate_criterion(criterion: &str) -> Result<&str, MatchError> {
    if criterion.is_empty() {
        return Err(MatchError::InvalidInput("criterion must not be empty".to_string()));
    }
    if criterion.len() > MAX_CRITERION_LEN {
        return Err(MatchError::InvalidInput(format!(
            "criterion longer than {} bytes",
            MAX_CRITERION_LEN
        )));
    }
    if criterion.trim() != criterion {
        return Err(MatchError::InvalidInput(
            "criterion has surrounding whitespace".to_string(),
        ));
    }
    if criterion.chars().any(char::is_control) {
        return Err(MatchError::InvalidInput(
            "criterion contains control characters".to_string(),
        ));
    }
    Ok(criterion)
}
