//! HTTP request handlers.
//!
//! - [`form`]: The HTML upload form
//! - [`uploads`]: File intake and retrieval

pub mod form;
pub mod uploads;
