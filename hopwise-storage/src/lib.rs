//! HOPWISE Storage - Mission persistence
//!
//! The engine loads a Mission before execution and saves it at every
//! boundary (wave, Hop transition, Mission transition). This crate defines
//! that collaborator and ships an in-memory implementation for tests and
//! embedding.

pub mod memory;
pub mod repository;

pub use memory::InMemoryMissionRepository;
pub use repository::{MissionRepository, MissionSummary};
