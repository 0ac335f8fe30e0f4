//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate pool checkout and repository calls into use-case APIs.
//! - Keep the HTTP layer decoupled from storage details.

pub mod person_service;
