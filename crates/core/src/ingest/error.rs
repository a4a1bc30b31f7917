use std::fmt;

/// Failure of a single upstream call. None of these are fatal; callers keep whatever
/// they already had and try again on a later tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    NotFound,
    RateLimited,
    Unreachable(String),
    Malformed(String),
}

impl ProviderError {
    pub fn label(&self) -> &'static str {
        match self {
            ProviderError::NotFound => "not_found",
            ProviderError::RateLimited => "rate_limited",
            ProviderError::Unreachable(_) => "unreachable",
            ProviderError::Malformed(_) => "malformed",
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::NotFound => write!(f, "upstream has no data for this symbol"),
            ProviderError::RateLimited => write!(f, "upstream rate limit reached"),
            ProviderError::Unreachable(detail) => write!(f, "upstream unreachable: {detail}"),
            ProviderError::Malformed(detail) => write!(f, "malformed upstream response: {detail}"),
        }
    }
}

impl std::error::Error for ProviderError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_survives_anyhow_wrapping() {
        let err = anyhow::Error::from(ProviderError::RateLimited).context("fetch trends");
        let label = err.downcast_ref::<ProviderError>().map(ProviderError::label);
        assert_eq!(label, Some("rate_limited"));
        assert_eq!(ProviderError::Malformed("x".into()).label(), "malformed");
    }
}
