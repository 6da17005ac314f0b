pub mod auth;
pub mod chats;
pub mod error;
pub mod files;
pub mod messages;
pub mod middleware;
pub mod push;
pub mod settings;
