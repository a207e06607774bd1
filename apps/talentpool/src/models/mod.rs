pub mod application;
pub mod cv;
pub mod job;
pub mod profile;
pub mod session;
