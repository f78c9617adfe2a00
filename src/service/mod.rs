pub mod accounts;
pub mod attendance;

pub use accounts::AccountService;
pub use attendance::{AttendanceService, RosterPolicy};
