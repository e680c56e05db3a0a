pub mod backends;
pub mod commands;
pub mod jobs;
