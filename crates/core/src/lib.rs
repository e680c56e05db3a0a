//! Domain logic for batch image generation.
//!
//! Pure, I/O-free pieces shared by the other crates: the command language,
//! the typed workflow graph and its injectors, conditioning descriptors,
//! result naming, and the shared error type.

pub mod command;
pub mod descriptors;
pub mod error;
pub mod graph;
pub mod hashing;
pub mod naming;
pub mod types;
