// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

/// The remote directory could not be reached or refused the request.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum NetworkFailure {
    #[error("no network connection")]
    NoConnection,

    #[error("server responded with status {status}: {message}")]
    Server { status: u16, message: String },
}

/// The crypto provider could not produce the requested key material.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CryptoProviderFailure {
    #[error("operation is not supported by the crypto provider")]
    NotSupported,

    #[error("crypto provider returned an empty batch")]
    EmptyBatch,

    #[error("crypto provider failed: {0}")]
    Provider(String),
}

/// Reading or writing locally persisted bookkeeping (counters, timestamps) failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StorageFailure {
    #[error("could not read {0} from storage")]
    Read(&'static str),

    #[error("could not write {0} to storage")]
    Write(&'static str),
}

/// Reason why a refill cycle was aborted.
///
/// None of these are fatal to the scheduler driving the refill, the cycle is simply tried again
/// at the next opportunity.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RefillError {
    #[error(transparent)]
    Network(#[from] NetworkFailure),

    #[error(transparent)]
    CryptoProvider(#[from] CryptoProviderFailure),

    #[error(transparent)]
    Storage(#[from] StorageFailure),

    #[error("no client is registered for the current identity")]
    MissingClientRegistration,

    #[error("mls is not enabled for this user")]
    MlsNotEnabled,
}

#[cfg(test)]
mod tests {
    use super::{CryptoProviderFailure, NetworkFailure, RefillError, StorageFailure};

    #[test]
    fn failures_convert_into_refill_error() {
        fn fails_with<E>(err: E) -> Result<(), RefillError>
        where
            RefillError: From<E>,
        {
            Err::<(), E>(err)?;
            Ok(())
        }

        assert_eq!(
            fails_with(NetworkFailure::NoConnection),
            Err(RefillError::Network(NetworkFailure::NoConnection))
        );
        assert_eq!(
            fails_with(CryptoProviderFailure::NotSupported),
            Err(RefillError::CryptoProvider(
                CryptoProviderFailure::NotSupported
            ))
        );
        assert_eq!(
            fails_with(StorageFailure::Read("most recent pre-key id")),
            Err(RefillError::Storage(StorageFailure::Read(
                "most recent pre-key id"
            )))
        );
    }

    #[test]
    fn transparent_messages() {
        let err = RefillError::from(NetworkFailure::Server {
            status: 503,
            message: "unavailable".into(),
        });
        assert_eq!(
            err.to_string(),
            "server responded with status 503: unavailable"
        );
    }
}
