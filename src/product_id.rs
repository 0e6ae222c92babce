use crate::defs::MAX_PRODUCT_ID_LEN;
use crate::errors::ProductIdError;

use std::fmt;

/// A validated product identifier: a non-empty run of decimal digits.
///
/// Instances only exist after [`ProductId::parse`] or
/// [`ProductId::from_wire`] accepted the input, so an invalid id can never
/// reach the poller.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProductId(String);

impl ProductId {
    /// Validates text received from a client.
    ///
    /// Surrounding whitespace is trimmed; the rest must be non-empty and
    /// consist only of ASCII digits.
    ///
    /// # Example
    ///
    /// ```
    /// use price_relay::product_id::ProductId;
    /// assert_eq!(ProductId::parse(" 42\n").unwrap().as_str(), "42");
    /// assert!(ProductId::parse("4a").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self, ProductIdError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ProductIdError::Empty);
        }
        if !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Err(ProductIdError::NonDigit(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Validates the raw bytes of a single identifier read.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, ProductIdError> {
        if bytes.len() > MAX_PRODUCT_ID_LEN {
            return Err(ProductIdError::TooLong(MAX_PRODUCT_ID_LEN));
        }
        let text = std::str::from_utf8(bytes).map_err(|_| ProductIdError::NotUtf8)?;
        Self::parse(text)
    }

    /// Returns the identifier as it appears in backend URLs.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
