pub mod api;
pub mod common;
pub mod election;
pub mod face;
pub mod mongodb;
pub mod otp;
pub mod session;
pub mod transaction;
