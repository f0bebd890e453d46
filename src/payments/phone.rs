// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Phone number normalization for the mobile-money gateway.
//!
//! The gateway only accepts payer numbers in international form
//! (`2547XXXXXXXX` / `2541XXXXXXXX`). Users type them in local form, so the
//! two accepted national prefixes are rewritten by replacing the leading zero
//! with the country code. Whitespace is stripped before validation.

use std::fmt;

/// Country calling code substituted for the national leading zero.
pub const COUNTRY_CODE: &str = "254";

/// Accepted national prefixes (leading zero included).
const LOCAL_PREFIXES: [&str; 2] = ["07", "01"];

/// Digits in a local number, prefix included.
const LOCAL_LENGTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,

    #[error("phone number may only contain digits")]
    NonNumeric,

    #[error("phone number must be {LOCAL_LENGTH} digits, got {0}")]
    WrongLength(usize),

    #[error("phone number must start with 07 or 01")]
    WrongPrefix,
}

/// Canonical international-format payer number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MsisdnNumber(String);

impl MsisdnNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for MsisdnNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a locally-formatted number into the gateway's canonical form.
pub fn normalize_phone(raw: &str) -> Result<MsisdnNumber, PhoneError> {
    let digits: String = raw.chars().filter(|c| !c.is_whitespace()).collect();

    if digits.is_empty() {
        return Err(PhoneError::Empty);
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(PhoneError::NonNumeric);
    }
    if digits.len() != LOCAL_LENGTH {
        return Err(PhoneError::WrongLength(digits.len()));
    }
    if !LOCAL_PREFIXES.iter().any(|prefix| digits.starts_with(prefix)) {
        return Err(PhoneError::WrongPrefix);
    }

    Ok(MsisdnNumber(format!("{COUNTRY_CODE}{}", &digits[1..])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_safaricom_prefix() {
        let phone = normalize_phone("0727921038").unwrap();
        assert_eq!(phone.as_str(), "254727921038");
    }

    #[test]
    fn normalizes_secondary_prefix() {
        let phone = normalize_phone("0110123456").unwrap();
        assert_eq!(phone.as_str(), "254110123456");
    }

    #[test]
    fn strips_embedded_whitespace() {
        assert_eq!(
            normalize_phone(" 0727 921 038 ").unwrap().as_str(),
            "254727921038"
        );
        assert_eq!(
            normalize_phone("07\t27921038").unwrap().as_str(),
            "254727921038"
        );
    }

    #[test]
    fn rejects_too_short() {
        assert_eq!(normalize_phone("0712"), Err(PhoneError::WrongLength(4)));
    }

    #[test]
    fn rejects_too_long() {
        assert_eq!(
            normalize_phone("07279210381"),
            Err(PhoneError::WrongLength(11))
        );
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert_eq!(normalize_phone("0827921038"), Err(PhoneError::WrongPrefix));
        assert_eq!(normalize_phone("7279210388"), Err(PhoneError::WrongPrefix));
    }

    #[test]
    fn rejects_already_international_form() {
        // Only local formats are accepted.
        assert_eq!(
            normalize_phone("254727921038"),
            Err(PhoneError::WrongLength(12))
        );
        assert_eq!(normalize_phone("+254727921038"), Err(PhoneError::NonNumeric));
    }

    #[test]
    fn rejects_non_numeric() {
        assert_eq!(normalize_phone("07279a1038"), Err(PhoneError::NonNumeric));
        assert_eq!(normalize_phone("0727-921-03"), Err(PhoneError::NonNumeric));
    }

    #[test]
    fn rejects_empty_and_blank() {
        assert_eq!(normalize_phone(""), Err(PhoneError::Empty));
        assert_eq!(normalize_phone("   "), Err(PhoneError::Empty));
    }

    #[test]
    fn every_valid_local_number_maps_deterministically() {
        for prefix in LOCAL_PREFIXES {
            for tail in ["00000000", "12345678", "99999999"] {
                let local = format!("{prefix}{tail}");
                let first = normalize_phone(&local).unwrap();
                let second = normalize_phone(&local).unwrap();
                assert_eq!(first, second);
                assert_eq!(first.as_str(), format!("254{}", &local[1..]));
            }
        }
    }
}
