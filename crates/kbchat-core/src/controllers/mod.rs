pub mod request_controller;

pub use request_controller::{RequestController, SendOutcome};
