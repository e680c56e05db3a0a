//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod command_repo;
pub mod group_repo;
pub mod item_repo;
pub mod job_repo;
pub mod server_repo;
pub mod template_repo;

pub use command_repo::CommandRepo;
pub use group_repo::GroupRepo;
pub use item_repo::ItemRepo;
pub use job_repo::JobRepo;
pub use server_repo::ServerRepo;
pub use template_repo::{FixerRepo, GeneratorRepo};
