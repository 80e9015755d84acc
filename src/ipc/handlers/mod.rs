pub mod attainment;
pub mod core;
pub mod course;
pub mod evaluations;
pub mod setup;
