// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! A `UUID4` Universally Unique Identifier (UUID) version 4 (RFC 4122).

use std::{
    fmt::{Debug, Display, Formatter},
    hash::Hash,
    str::FromStr,
};

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Represents a Universally Unique Identifier (UUID)
/// version 4 based on a 128-bit label as specified in RFC 4122.
#[derive(Copy, Clone, Hash, PartialEq, Eq)]
pub struct UUID4 {
    value: Uuid,
}

impl UUID4 {
    /// Creates a new [`UUID4`] instance.
    #[must_use]
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);

        bytes[6] = (bytes[6] & 0x0F) | 0x40; // Set the version to 4
        bytes[8] = (bytes[8] & 0x3F) | 0x80; // Set the variant to RFC 4122

        Self {
            value: Uuid::from_bytes(bytes),
        }
    }

    /// Returns the underlying [`Uuid`] value.
    #[must_use]
    pub const fn inner(&self) -> Uuid {
        self.value
    }

    fn validate_v4(uuid: &Uuid) {
        assert!(
            uuid.get_version() == Some(uuid::Version::Random),
            "UUID is not version 4"
        );
        assert!(
            uuid.get_variant() == uuid::Variant::RFC4122,
            "UUID is not RFC 4122 variant"
        );
    }
}

impl FromStr for UUID4 {
    type Err = uuid::Error;

    /// Attempts to create a [`UUID4`] from a string representation.
    ///
    /// The string should be a valid UUID in the standard format
    /// (e.g., "2d89666b-1a1e-4a75-b193-4eb3b454c757").
    ///
    /// # Panics
    ///
    /// This function panics:
    /// - If the `value` is not a valid UUID version 4 RFC 4122.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::try_parse(value)?;
        Self::validate_v4(&uuid);
        Ok(Self { value: uuid })
    }
}

impl From<&str> for UUID4 {
    /// Creates a [`UUID4`] from a string slice.
    ///
    /// # Panics
    ///
    /// This function panics:
    /// - If the `value` string is not a valid UUID version 4 RFC 4122.
    fn from(value: &str) -> Self {
        value
            .parse()
            .expect("`value` should be a valid UUID version 4 (RFC 4122)")
    }
}

impl Default for UUID4 {
    /// Creates a new default [`UUID4`] instance.
    ///
    /// The default UUID4 is simply a newly generated UUID version 4.
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for UUID4 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}('{}')", stringify!(UUID4), self)
    }
}

impl Display for UUID4 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl Serialize for UUID4 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for UUID4 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_new() {
        let uuid = UUID4::new();
        let value = uuid.inner();
        assert_eq!(value.get_version(), Some(uuid::Version::Random));
        assert_eq!(value.get_variant(), uuid::Variant::RFC4122);
    }

    #[rstest]
    fn test_uniqueness() {
        let uuid1 = UUID4::new();
        let uuid2 = UUID4::new();
        assert_ne!(uuid1, uuid2);
    }

    #[rstest]
    fn test_equality_by_value() {
        let value = "2d89666b-1a1e-4a75-b193-4eb3b454c757";
        let uuid1 = UUID4::from(value);
        let uuid2 = UUID4::from(value);
        assert_eq!(uuid1, uuid2);
    }

    #[rstest]
    fn test_from_str_valid() {
        let value = "2d89666b-1a1e-4a75-b193-4eb3b454c757";
        let uuid: UUID4 = value.parse().unwrap();
        assert_eq!(uuid.to_string(), value);
    }

    #[rstest]
    fn test_from_str_invalid() {
        let result = "not-a-uuid".parse::<UUID4>();
        assert!(result.is_err());
    }

    #[rstest]
    #[should_panic(expected = "UUID is not version 4")]
    fn test_from_str_wrong_version() {
        // A valid UUID string, but version 1
        let _ = "c232ab00-9414-11ec-b3c8-9f68deced846".parse::<UUID4>();
    }

    #[rstest]
    fn test_debug_format() {
        let value = "2d89666b-1a1e-4a75-b193-4eb3b454c757";
        let uuid = UUID4::from(value);
        assert_eq!(format!("{uuid:?}"), format!("UUID4('{value}')"));
    }

    #[rstest]
    fn test_serde_round_trip() {
        let uuid = UUID4::new();
        let json = serde_json::to_string(&uuid).unwrap();
        let deserialized: UUID4 = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, uuid);
    }
}
