//! HLS manifest handling: classification, line typing, URL resolution and
//! the media/master rewriting passes.

pub mod classify;
pub mod line;
pub mod master;
pub mod media;
pub mod url;
