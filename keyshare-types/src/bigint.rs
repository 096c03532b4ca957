//! Serde helpers for big integers in the ABC wire format.
//!
//! The ABC protocol serializes all large integers as base-10 decimal
//! strings; challenges arriving from clients may additionally be bare JSON
//! numbers of arbitrary width. The [`decimal`] module plugs into
//! `#[serde(with = "...")]` attributes,
//! [`deserialize_decimal_or_number`] covers the lenient case. The lenient
//! path goes through [`serde_json::Value`], whose `arbitrary_precision`
//! representation keeps the raw numeric token intact, so a 256-bit bare
//! number survives exactly instead of collapsing into a float.

use std::fmt;

use num_bigint::BigUint;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serializer};

/// Serialize / deserialize a [`BigUint`] as a base-10 decimal string.
pub mod decimal {
    use super::*;

    /// Serializes the value as a decimal string.
    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.to_str_radix(10))
    }

    /// Deserializes a decimal string into a [`BigUint`].
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        struct DecimalVisitor;

        impl Visitor<'_> for DecimalVisitor {
            type Value = BigUint;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a base-10 big integer string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                parse_decimal(v).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(DecimalVisitor)
    }
}

/// Deserializes a [`BigUint`] from either a decimal string or a bare JSON
/// number of any width. Clients send proof challenges in both spellings.
pub fn deserialize_decimal_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BigUint, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(number) => {
            parse_decimal(&number.to_string()).map_err(de::Error::custom)
        }
        serde_json::Value::String(string) => parse_decimal(&string).map_err(de::Error::custom),
        _ => Err(de::Error::custom(
            "expected a big integer as JSON number or decimal string",
        )),
    }
}

fn parse_decimal(s: &str) -> Result<BigUint, String> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("not a base-10 unsigned integer: {s:?}"));
    }
    BigUint::parse_bytes(s.as_bytes(), 10)
        .ok_or_else(|| format!("not a base-10 unsigned integer: {s:?}"))
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "deserialize_decimal_or_number")] BigUint);

    #[derive(Serialize, Deserialize)]
    struct DecimalWrapper(#[serde(with = "decimal")] BigUint);

    #[test]
    fn accepts_number_and_string() {
        let from_number: Wrapper = serde_json::from_str("42").unwrap();
        let from_string: Wrapper = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(from_number.0, from_string.0);
        assert_eq!(from_number.0, BigUint::from(42u32));
    }

    #[test]
    fn accepts_bare_numbers_beyond_machine_width() {
        // a 256-bit challenge as the bare-number spelling the client emits
        let decimal = "113423713055421844361000442879713401425272367589593892602896767893151443609601";
        let from_number: Wrapper = serde_json::from_str(decimal).unwrap();
        let from_string: Wrapper = serde_json::from_str(&format!("\"{decimal}\"")).unwrap();
        assert_eq!(from_number.0, from_string.0);
        assert_eq!(
            from_number.0,
            BigUint::parse_bytes(decimal.as_bytes(), 10).unwrap()
        );
        assert!(from_number.0 > BigUint::from(u64::MAX));
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert!(serde_json::from_str::<Wrapper>("\"-3\"").is_err());
        assert!(serde_json::from_str::<Wrapper>("-3").is_err());
        assert!(serde_json::from_str::<Wrapper>("1.5").is_err());
        assert!(serde_json::from_str::<Wrapper>("\"0x2a\"").is_err());
        assert!(serde_json::from_str::<Wrapper>("\"\"").is_err());
        assert!(serde_json::from_str::<Wrapper>("[42]").is_err());
    }

    #[test]
    fn decimal_roundtrips_large_values() {
        let value = BigUint::parse_bytes(b"123456789012345678901234567890123456789", 10).unwrap();
        let json = serde_json::to_string(&DecimalWrapper(value.clone())).unwrap();
        assert_eq!(json, "\"123456789012345678901234567890123456789\"");
        let back: DecimalWrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.0, value);
    }
}
