use validator::Validate;

use crate::error::{Error, Result};

/// Runs field validation, reporting failures as a rejected payload.
pub fn validate<T: Validate>(val: &T) -> Result<()> {
    val.validate()
        .map_err(|e| Error::BadRequest(format!("invalid_payload: {}", e)))
}
