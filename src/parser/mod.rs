//! Email parsing: streaming MBOX reader, header decoding, MIME normalization, HTML flattening.

pub mod header;
pub mod html;
pub mod mbox;
pub mod mime;
