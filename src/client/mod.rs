//! Client-side attendance capture.
//!
//! The capture screen is a `CaptureController` driven by `CaptureAction`s. It
//! reaches the data through an `AttendanceGateway`: in-process over the local
//! store in client-only mode, or over the REST API when a server is in front.

pub mod capture;
pub mod gateway;

pub use capture::{CaptureAction, CaptureController, CaptureRow, CaptureView, Notice};
pub use gateway::{AttendanceGateway, GatewayError, HttpGateway, LocalGateway};
