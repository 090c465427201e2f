pub mod chat;
pub mod predictions;
pub mod session;
