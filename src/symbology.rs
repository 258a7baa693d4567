//! Payload rules and bar encoding for barcode and QR elements

use barcoders::sym::code128::Code128;
use barcoders::sym::code39::Code39;
use barcoders::sym::code93::Code93;
use barcoders::sym::ean13::EAN13;
use barcoders::sym::ean8::EAN8;
use qrcode::{Color, EcLevel, QrCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest payload accepted for variable-length linear symbologies.
pub const MAX_LINEAR_LEN: usize = 80;

/// Code 128 character set B start marker understood by the encoder.
const CODE128_SET_B: char = '\u{0181}';

const CODE39_EXTRA: &str = " -.$/+%";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Symbology {
    #[default]
    Code128,
    Code39,
    Code93,
    Ean13,
    Ean8,
    UpcA,
}

impl fmt::Display for Symbology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Symbology::Code128 => "Code 128",
            Symbology::Code39 => "Code 39",
            Symbology::Code93 => "Code 93",
            Symbology::Ean13 => "EAN-13",
            Symbology::Ean8 => "EAN-8",
            Symbology::UpcA => "UPC-A",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QrEcLevel {
    L,
    #[default]
    M,
    Q,
    H,
}

impl From<QrEcLevel> for EcLevel {
    fn from(level: QrEcLevel) -> Self {
        match level {
            QrEcLevel::L => EcLevel::L,
            QrEcLevel::M => EcLevel::M,
            QrEcLevel::Q => EcLevel::Q,
            QrEcLevel::H => EcLevel::H,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload is empty")]
    Empty,

    #[error("character {ch:?} is not allowed in {symbology} payloads")]
    IllegalCharacter { symbology: Symbology, ch: char },

    #[error("{symbology} payload must be {expected} characters, got {actual}")]
    Length {
        symbology: Symbology,
        expected: String,
        actual: usize,
    },

    #[error("{symbology} check digit is {actual}, expected {expected}")]
    CheckDigit {
        symbology: Symbology,
        expected: char,
        actual: char,
    },

    #[error("{symbology} encoder rejected payload: {reason}")]
    Encoder { symbology: Symbology, reason: String },

    #[error("QR payload rejected: {0}")]
    Qr(String),
}

impl Symbology {
    /// Check a payload against this symbology's character set and length rules.
    pub fn validate(self, payload: &str) -> Result<(), PayloadError> {
        self.normalize(payload).map(|_| ())
    }

    /// Encode to modules, `true` = bar.
    pub fn encode(self, payload: &str) -> Result<Vec<bool>, PayloadError> {
        let data = self.normalize(payload)?;

        let modules = match self {
            Symbology::Code128 => {
                let prefixed = format!("{}{}", CODE128_SET_B, data);
                Code128::new(prefixed.as_str()).map_err(self.encoder_error())?.encode()
            }
            Symbology::Code39 => Code39::new(data.as_str()).map_err(self.encoder_error())?.encode(),
            Symbology::Code93 => Code93::new(data.as_str()).map_err(self.encoder_error())?.encode(),
            Symbology::Ean13 | Symbology::UpcA => {
                EAN13::new(data.as_str()).map_err(self.encoder_error())?.encode()
            }
            Symbology::Ean8 => EAN8::new(data.as_str()).map_err(self.encoder_error())?.encode(),
        };

        Ok(modules.into_iter().map(|m| m == 1).collect())
    }

    fn encoder_error<E: fmt::Debug>(self) -> impl FnOnce(E) -> PayloadError {
        move |e| PayloadError::Encoder {
            symbology: self,
            reason: format!("{:?}", e),
        }
    }

    /// Returns the data handed to the encoder. Fixed-length symbologies drop
    /// a supplied check digit after verifying it.
    fn normalize(self, payload: &str) -> Result<String, PayloadError> {
        if payload.is_empty() {
            return Err(PayloadError::Empty);
        }

        match self {
            Symbology::Code128 => {
                self.check_chars(payload, |c| (' '..='~').contains(&c))?;
                self.check_max_len(payload)?;
                Ok(payload.to_string())
            }
            Symbology::Code39 | Symbology::Code93 => {
                self.check_chars(payload, |c| {
                    c.is_ascii_uppercase() || c.is_ascii_digit() || CODE39_EXTRA.contains(c)
                })?;
                self.check_max_len(payload)?;
                Ok(payload.to_string())
            }
            Symbology::Ean13 => self.fixed_digits(payload, 12, ""),
            Symbology::Ean8 => self.fixed_digits(payload, 7, ""),
            // UPC-A is EAN-13 with a leading zero.
            Symbology::UpcA => self.fixed_digits(payload, 11, "0"),
        }
    }

    fn check_chars(self, payload: &str, allowed: impl Fn(char) -> bool) -> Result<(), PayloadError> {
        match payload.chars().find(|c| !allowed(*c)) {
            Some(ch) => Err(PayloadError::IllegalCharacter { symbology: self, ch }),
            None => Ok(()),
        }
    }

    fn check_max_len(self, payload: &str) -> Result<(), PayloadError> {
        let len = payload.chars().count();
        if len > MAX_LINEAR_LEN {
            return Err(PayloadError::Length {
                symbology: self,
                expected: format!("at most {}", MAX_LINEAR_LEN),
                actual: len,
            });
        }
        Ok(())
    }

    fn fixed_digits(self, payload: &str, data_len: usize, prefix: &str) -> Result<String, PayloadError> {
        self.check_chars(payload, |c| c.is_ascii_digit())?;

        let len = payload.len();
        if len != data_len && len != data_len + 1 {
            return Err(PayloadError::Length {
                symbology: self,
                expected: format!("{} or {}", data_len, data_len + 1),
                actual: len,
            });
        }

        let data = format!("{}{}", prefix, &payload[..data_len]);
        if len == data_len + 1 {
            let expected = check_digit(&data);
            let actual = payload[data_len..].chars().next().unwrap_or('?');
            if expected != actual {
                return Err(PayloadError::CheckDigit { symbology: self, expected, actual });
            }
        }
        Ok(data)
    }
}

/// GS1 mod-10 check digit over an all-digit string.
fn check_digit(digits: &str) -> char {
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if i % 2 == 0 { d * 3 } else { d }
        })
        .sum();
    char::from(b'0' + ((10 - sum % 10) % 10) as u8)
}

/// Square module matrix of an encoded QR symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrMatrix {
    pub width: usize,
    pub modules: Vec<bool>,
}

impl QrMatrix {
    pub fn is_dark(&self, x: usize, y: usize) -> bool {
        self.modules.get(y * self.width + x).copied().unwrap_or(false)
    }
}

pub fn validate_qr(payload: &str, level: QrEcLevel) -> Result<(), PayloadError> {
    encode_qr(payload, level).map(|_| ())
}

pub fn encode_qr(payload: &str, level: QrEcLevel) -> Result<QrMatrix, PayloadError> {
    if payload.is_empty() {
        return Err(PayloadError::Empty);
    }
    let code = QrCode::with_error_correction_level(payload.as_bytes(), level.into())
        .map_err(|e| PayloadError::Qr(e.to_string()))?;
    Ok(QrMatrix {
        width: code.width(),
        modules: code.to_colors().into_iter().map(|c| c == Color::Dark).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_digits() {
        assert_eq!(check_digit("400638133393"), '1');
        assert_eq!(check_digit("9638507"), '4');
        assert_eq!(check_digit("003600029145"), '2');
    }

    #[test]
    fn test_ean13_accepts_with_or_without_check_digit() {
        assert!(Symbology::Ean13.validate("400638133393").is_ok());
        assert!(Symbology::Ean13.validate("4006381333931").is_ok());
        assert!(matches!(
            Symbology::Ean13.validate("4006381333932"),
            Err(PayloadError::CheckDigit { expected: '1', actual: '2', .. })
        ));
    }

    #[test]
    fn test_fixed_length_rules() {
        assert!(matches!(Symbology::Ean8.validate("12345"), Err(PayloadError::Length { .. })));
        assert!(matches!(
            Symbology::Ean13.validate("40063813339A"),
            Err(PayloadError::IllegalCharacter { ch: 'A', .. })
        ));
        assert!(Symbology::UpcA.validate("036000291452").is_ok());
        assert!(Symbology::UpcA.validate("03600029145").is_ok());
    }

    #[test]
    fn test_code39_character_set() {
        assert!(Symbology::Code39.validate("ABC-123").is_ok());
        assert!(matches!(
            Symbology::Code39.validate("abc"),
            Err(PayloadError::IllegalCharacter { ch: 'a', .. })
        ));
    }

    #[test]
    fn test_code128_rejects_non_ascii_and_empty() {
        assert!(Symbology::Code128.validate("Hello 42").is_ok());
        assert!(Symbology::Code128.validate("héllo").is_err());
        assert_eq!(Symbology::Code128.validate(""), Err(PayloadError::Empty));
        assert!(Symbology::Code128.validate(&"x".repeat(MAX_LINEAR_LEN + 1)).is_err());
    }

    #[test]
    fn test_encode_produces_bars() {
        let bars = Symbology::Code128.encode("Hello").unwrap();
        assert!(bars.iter().any(|&b| b));
        let ean = Symbology::Ean13.encode("4006381333931").unwrap();
        let upc = Symbology::UpcA.encode("036000291452").unwrap();
        assert_eq!(ean.len(), upc.len());
    }

    #[test]
    fn test_qr_matrix() {
        let matrix = encode_qr("https://example.com/item/1", QrEcLevel::M).unwrap();
        assert!(matrix.width >= 21);
        assert_eq!(matrix.modules.len(), matrix.width * matrix.width);
        // Finder pattern corner is always dark.
        assert!(matrix.is_dark(0, 0));
    }

    #[test]
    fn test_qr_capacity_limit() {
        let huge = "9".repeat(8000);
        assert!(matches!(validate_qr(&huge, QrEcLevel::H), Err(PayloadError::Qr(_))));
    }
}
