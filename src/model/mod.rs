//! Data model for normalized messages, addresses, and attachments.

pub mod address;
pub mod attachment;
pub mod message;
