pub mod attendance;
pub mod role;
pub mod school;
pub mod user;
