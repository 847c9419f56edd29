//! Streams and address helpers.
//!
//! - [`stream`]: Stream state and the per-stream engine API
//! - [`utils`]: Host resolution and `sockaddr` conversion

pub(crate) mod stream;
pub(crate) mod utils;
