//! Error type shared by every part of the anonymization engine.

use crate::family::AddressFamily;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnonymizeError {
    #[error("'{text}' is not a valid {family} address")]
    Format { family: AddressFamily, text: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("ran out of {family} addresses with a {mask}-bit mask; try a smaller mask or a lower start address")]
    AddressSpaceExhausted { family: AddressFamily, mask: u32 },

    #[error("{family} synthetic address {synthetic} is already bound to {existing}, refusing to bind it to {attempted}")]
    InvariantViolation {
        family: AddressFamily,
        synthetic: String,
        existing: String,
        attempted: String,
    },

    #[error("gave up allocating a {family} address after {attempts} colliding attempts")]
    AllocationRetryExceeded { family: AddressFamily, attempts: u32 },
}

impl AnonymizeError {
    /// Whether the error should stop a whole capture run rather than a single field.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AnonymizeError::Format { .. } | AnonymizeError::AllocationRetryExceeded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AnonymizeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality() {
        let exhausted = AnonymizeError::AddressSpaceExhausted { family: AddressFamily::Mac, mask: 40 };
        let retries = AnonymizeError::AllocationRetryExceeded { family: AddressFamily::Ipv4, attempts: 8 };
        assert!(exhausted.is_fatal());
        assert!(!retries.is_fatal());
        assert!(exhausted.to_string().contains("MAC"));
    }
}
