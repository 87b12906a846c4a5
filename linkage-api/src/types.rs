//! Request and response bodies for the HTTP API.

use linkage_core::{Contact, ContactSummary};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;

// ============================================================================
// IDENTIFY
// ============================================================================

/// Body of `POST /identify`.
///
/// Both fields are optional on the wire; `null` and `""` mean absent.
/// `phoneNumber` may be sent as a JSON integer and is kept as its decimal
/// string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IdentifyRequest {
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(example = "lorraine@hillvalley.edu"))]
    pub email: Option<String>,

    #[serde(default, deserialize_with = "deserialize_phone_number")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, example = "123456"))]
    pub phone_number: Option<String>,
}

/// Body of a successful `POST /identify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct IdentifyResponse {
    pub contact: ContactSummary,
}

// ============================================================================
// CONTACT LISTING
// ============================================================================

/// Body of `GET /contacts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ListContactsResponse {
    pub contacts: Vec<Contact>,
    pub total: usize,
}

impl From<Vec<Contact>> for ListContactsResponse {
    fn from(contacts: Vec<Contact>) -> Self {
        Self {
            total: contacts.len(),
            contacts,
        }
    }
}

// ============================================================================
// PHONE NUMBER DESERIALIZATION
// ============================================================================

fn deserialize_phone_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PhoneNumberVisitor;

    impl<'de> de::Visitor<'de> for PhoneNumberVisitor {
        type Value = Option<String>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a phone number as a string or integer")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
            deserializer.deserialize_any(self)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_string<E: de::Error>(self, value: String) -> Result<Self::Value, E> {
            Ok(Some(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }
    }

    deserializer.deserialize_option(PhoneNumberVisitor)
}
