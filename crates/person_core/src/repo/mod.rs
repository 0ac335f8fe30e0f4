//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Multi-table writes happen inside one transaction and are either fully
//!   committed or fully rolled back.
//! - Reads report absence as `None`, never as a transport error.

pub mod person_repo;
