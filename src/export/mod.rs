//! Output writers: attachment files and PDF documents.

pub mod attachment;
pub mod font;
pub mod layout;
pub mod pdf;
