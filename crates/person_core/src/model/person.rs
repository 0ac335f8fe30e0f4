//! Person domain model.
//!
//! # Responsibility
//! - Define the payload accepted by person creation.
//! - Define the profile projection returned by reads.
//!
//! # Invariants
//! - `PersonId` values are always positive.
//! - Text fields are stored and returned verbatim; empty strings are valid.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Store-generated person identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct PersonId(i64);

impl PersonId {
    /// Wraps a raw identifier, rejecting zero and negative values.
    pub fn new(value: i64) -> Result<Self, InvalidPersonId> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(InvalidPersonId(value.to_string()))
        }
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl Display for PersonId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PersonId {
    type Err = InvalidPersonId;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let raw = value
            .parse::<i64>()
            .map_err(|_| InvalidPersonId(value.to_string()))?;
        Self::new(raw)
    }
}

impl TryFrom<i64> for PersonId {
    type Error = InvalidPersonId;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PersonId> for i64 {
    fn from(value: PersonId) -> Self {
        value.0
    }
}

/// Raw input that does not form a positive integer identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPersonId(pub String);

impl Display for InvalidPersonId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid person id `{}`", self.0)
    }
}

impl Error for InvalidPersonId {}

/// Payload for creating a person with one phone number and one address.
///
/// Absent JSON fields deserialize as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewPerson {
    pub name: String,
    pub phone_number: String,
    pub city: String,
    pub state: String,
    pub street1: String,
    pub street2: String,
    pub zip_code: String,
}

/// Flattened view of a person joined with phone and address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonProfile {
    pub name: String,
    pub phone_number: String,
    pub city: String,
    pub state: String,
    pub street1: String,
    pub street2: String,
    pub zip_code: String,
}

impl From<NewPerson> for PersonProfile {
    /// The profile a successful creation of `value` reads back as.
    fn from(value: NewPerson) -> Self {
        Self {
            name: value.name,
            phone_number: value.phone_number,
            city: value.city,
            state: value.state,
            street1: value.street1,
            street2: value.street2,
            zip_code: value.zip_code,
        }
    }
}
