pub mod client;
pub mod consultant;
pub mod health;
