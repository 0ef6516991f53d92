pub mod flat;
pub mod message;
pub mod notification;
pub mod user;
