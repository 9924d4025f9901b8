use thiserror::Error;

use crate::document::DocumentError;
use crate::sdjwt::SdJwtError;
use crate::secure_area::SecureAreaError;
use crate::storage::StorageError;

/// Error outputs from `credkit`.
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum CredkitError {
    /// A claim envelope could not be decoded or is missing data.
    #[error(transparent)]
    Claims(#[from] SdJwtError),
    /// A secure-area backend rejected or failed a key operation.
    #[error(transparent)]
    SecureArea(#[from] SecureAreaError),
    /// A document store operation failed.
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// The storage collaborator failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result alias for operations surfacing a [`CredkitError`].
pub type CredkitResult<T, E = CredkitError> = std::result::Result<T, E>;
