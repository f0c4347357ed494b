//! Subject validation.

use crate::codec::ProtocolError;

/// Maximum subject length.
pub const MAX_SUBJECT_LENGTH: usize = 1024;

/// Validate a subject, queue group or inbox name.
///
/// Subjects must be non-empty and must not contain whitespace, since
/// whitespace separates fields on the wire.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidSubject`] if the name is invalid.
pub fn validate_subject(subject: &str) -> Result<(), ProtocolError> {
    if subject.is_empty()
        || subject.len() > MAX_SUBJECT_LENGTH
        || subject.chars().any(char::is_whitespace)
    {
        return Err(ProtocolError::InvalidSubject(subject.to_string()));
    }
    Ok(())
}
