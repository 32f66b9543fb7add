//! Secret strings that never show up in logs or serialized config.

use bon::Builder;
use derive_more::From;
use getset::Getters;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Formatter};
use std::result;
use zeroize::Zeroize;

/// Placeholder text shown instead of the actual secret
pub static REDACTED: &str = "###REDACTED###";

/// A string that gets redacted in debug output and serialization.
///
/// Memory is zeroed on drop.
#[derive(Clone, Zeroize, From, Builder, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct RedactedString {
    #[builder(into)]
    inner: String,
}

impl Debug for RedactedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", REDACTED)
    }
}

impl Serialize for RedactedString {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for RedactedString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(RedactedStringVisitor)
    }
}

impl Drop for RedactedString {
    fn drop(&mut self) {
        self.zeroize();
    }
}

struct RedactedStringVisitor;

impl Visitor<'_> for RedactedStringVisitor {
    type Value = RedactedString;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a string")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(RedactedString::builder().inner(v).build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_and_serialize_are_redacted() {
        let secret = RedactedString::builder().inner("cassandra").build();
        assert_eq!(format!("{secret:?}"), REDACTED);
        assert_eq!(
            serde_json::to_string(&secret).unwrap(),
            format!("\"{REDACTED}\"")
        );
        assert_eq!(secret.inner(), "cassandra");
    }

    #[test]
    fn test_deserialize_keeps_value() {
        let secret: RedactedString = serde_yml::from_str("s3cr3t").unwrap();
        assert_eq!(secret.inner(), "s3cr3t");
    }

    #[test]
    fn test_zeroize_clears() {
        let mut secret = RedactedString::builder().inner("cassandra").build();
        secret.zeroize();
        assert!(secret.inner().is_empty());
    }
}
