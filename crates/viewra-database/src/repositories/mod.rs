//! Repository implementations for database entities

pub mod sessions;

pub use sessions::SessionRepository;
