//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **URL validation**: Scheme and host checks on feed descriptor URLs
//! - **Text processing**: Markup stripping, excerpting and control-char removal
//!   for text taken from untrusted feeds
//!
//! # Examples
//!
//! ```
//! use feedrelay::util::{clean_description, validate_feed_url};
//!
//! let url = validate_feed_url("https://example.com/feed.xml", false).unwrap();
//! let excerpt = clean_description("<p>Hello <em>world</em></p>", 200);
//! assert_eq!(excerpt, "Hello world");
//! ```

mod text;
mod url_validator;

pub use text::{clean_description, first_image_src, strip_control_chars, truncate_chars};
pub use url_validator::{validate_feed_url, UrlValidationError};
