//! `mbox2pdf` — convert MBOX mail archives into one PDF per message.
//!
//! Messages are streamed from the archive, normalized (headers, body text,
//! attachments), their attachments written beside the PDFs, and each message
//! rendered as a paginated PDF. Every outcome is recorded in `conversion.log`.

pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod naming;
pub mod parser;
pub mod run;
