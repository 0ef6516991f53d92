pub mod auth;
pub mod flats;
pub mod messages;
pub mod notifications;
pub mod users;
