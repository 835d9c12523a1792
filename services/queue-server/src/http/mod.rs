pub mod admin;
pub mod counter;
pub mod events;
pub mod line_webhook;
pub mod response;
pub mod session;
pub mod ticket;
