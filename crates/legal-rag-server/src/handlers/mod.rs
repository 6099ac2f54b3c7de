pub mod chat;
pub mod contracts;
pub mod health;
pub mod knowledge;
