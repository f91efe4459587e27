//! Hexadecimal text form of binary blobs, for use with `#[serde(with = "...")]`.
//!
//! Serialized as uppercase hexadecimal. On input, whitespace is ignored so
//! that long blobs can be split over several lines.

use bytes::Bytes;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

/// Encode bytes as uppercase hexadecimal text.
pub fn encode(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Decode hexadecimal text, ignoring whitespace.
pub fn decode(text: &str) -> Result<Bytes, hex::FromHexError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(compact).map(Bytes::from)
}

pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&encode(bytes))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    decode(&text).map_err(D::Error::custom)
}

/// Same text form for optional blobs. A missing value is `null`.
pub mod option {
    use bytes::Bytes;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => serializer.serialize_some(&super::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Bytes>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => super::decode(&text).map(Some).map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ignores_whitespace() {
        let bytes = decode("01 02\n  0A ff").unwrap();
        assert_eq!(&bytes[..], &[0x01, 0x02, 0x0A, 0xFF]);
        assert_eq!(encode(&bytes), "01020AFF");
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        assert!(decode("ABC").is_err());
    }
}
