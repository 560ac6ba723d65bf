use crate::broker::ProviderError;

/// Errors returned by [`ResultExchange`](crate::ResultExchange) operations.
///
/// [`Error::InvalidToken`] and [`Error::Authorization`] are routine outcomes of the retrieval
/// protocol rather than failures; see [`Error::is_routine`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to generate result token")]
    TokenIssuance(#[source] ProviderError),

    /// The token is malformed, or its queue has expired, been consumed, or never existed.  These
    /// cases are deliberately indistinguishable.
    #[error("the provided result token is invalid")]
    InvalidToken,

    #[error("failed to publish result")]
    Publish(#[source] ProviderError),

    /// A result is present, but it belongs to someone else.  The result is left in place.
    #[error("requester is not authorized to access this result")]
    Authorization,

    #[error("failed to get result")]
    Fetch(#[source] ProviderError),

    /// A fetched message was not a result envelope.
    #[error("malformed result envelope")]
    Envelope(#[source] serde_json::Error),
}

impl Error {
    /// True for outcomes that are a normal part of retrieving results (invalid tokens and
    /// forbidden access), as opposed to broker or data failures.
    pub fn is_routine(&self) -> bool {
        matches!(self, Error::InvalidToken | Error::Authorization)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::anyhow;
    use std::error::Error as StdError;

    #[test]
    fn routine_errors() {
        assert!(Error::InvalidToken.is_routine());
        assert!(Error::Authorization.is_routine());
        assert!(!Error::Publish(ProviderError::ChannelNotFound("q".into())).is_routine());
    }

    #[test]
    fn source_chain_is_kept() {
        let err = Error::TokenIssuance(ProviderError::ChannelCreation(anyhow!("refused")));
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "failed to create channel");
        assert_eq!(source.source().unwrap().to_string(), "refused");
    }
}
