pub mod log_setup;
pub mod parallel;
