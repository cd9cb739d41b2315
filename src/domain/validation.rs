//! Field-level input checks shared by the workflow operations.

use crate::error::{MerchantError, Result};

pub fn required(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MerchantError::validation(format!("{field} is required")));
    }
    Ok(())
}

pub fn max_len(field: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(MerchantError::validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(())
}

pub fn email(field: &str, value: &str) -> Result<()> {
    required(field, value)?;
    match value.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(MerchantError::validation(format!(
            "{field} is not a valid email address"
        ))),
    }
}

/// Vanity URLs are lowercase letters, digits and dashes.
pub fn slug(field: &str, value: &str) -> Result<()> {
    required(field, value)?;
    if value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        Ok(())
    } else {
        Err(MerchantError::validation(format!(
            "{field} may only contain lowercase letters, digits and dashes"
        )))
    }
}
