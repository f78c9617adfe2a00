pub mod account;
pub mod attendance;
pub mod classes;
pub mod dashboard;
