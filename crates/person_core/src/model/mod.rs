//! Domain model for people, their phone and their address.
//!
//! # Responsibility
//! - Define the creation payload and the flattened read-side profile.
//! - Provide a strongly typed person identifier.
//!
//! # Invariants
//! - Person identifiers are store-generated positive integers.
//! - Records are create-once, read-many; there is no update or delete shape.

pub mod person;
