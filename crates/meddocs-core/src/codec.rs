//! Payload codec shared by backup archives and recycle-bin snapshots.
//!
//! A payload is UTF-8 JSON wrapped in standard Base64. The wrapping is
//! obfuscation only and offers no confidentiality. Decoding ignores ASCII
//! whitespace, so payloads written with 76-column line breaks still parse.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Serialize, de::DeserializeOwned};

use crate::Result;

/// Serialise `value` to JSON and wrap it in Base64.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
  let json = serde_json::to_vec(value)?;
  Ok(STANDARD.encode(json))
}

/// Unwrap a Base64 payload and deserialise the JSON inside.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
  let json = unwrap(text)?;
  Ok(serde_json::from_slice(&json)?)
}

/// Unwrap a Base64 payload to its raw JSON bytes.
pub fn unwrap(text: &str) -> Result<Vec<u8>> {
  let compact: Vec<u8> = text
    .bytes()
    .filter(|b| !b.is_ascii_whitespace())
    .collect();
  Ok(STANDARD.decode(compact)?)
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::Error;

  #[test]
  fn encode_then_decode() {
    let value = json!({ "version": 2, "deviceName": "ward-tablet" });
    let text = encode(&value).unwrap();
    assert!(!text.contains('{'));
    let back: serde_json::Value = decode(&text).unwrap();
    assert_eq!(back, value);
  }

  #[test]
  fn decode_tolerates_line_wrapping() {
    let value = json!({ "patients": ["a".repeat(120)] });
    let text = encode(&value).unwrap();
    let wrapped = text
      .as_bytes()
      .chunks(76)
      .map(|c| std::str::from_utf8(c).unwrap())
      .collect::<Vec<_>>()
      .join("\n")
      + "\n";
    let back: serde_json::Value = decode(&wrapped).unwrap();
    assert_eq!(back, value);
  }

  #[test]
  fn garbage_is_an_encoding_error() {
    let err = decode::<serde_json::Value>("not base64 at all!").unwrap_err();
    assert!(matches!(err, Error::Encoding(_)));
  }

  #[test]
  fn valid_base64_invalid_json_is_a_serialization_error() {
    let text = STANDARD.encode(b"{ nope");
    let err = decode::<serde_json::Value>(&text).unwrap_err();
    assert!(matches!(err, Error::Serialization(_)));
  }
}
