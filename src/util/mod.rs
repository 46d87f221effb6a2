//! Utility functions shared by the crawler and the collaborators.
//!
//! - **URL normalization**: canonical URL literals and origin (domain) keys
//! - **Text cleanup**: control-character stripping and whitespace collapsing
//!
//! # Examples
//!
//! ```
//! use feedcluster::util::{clean_text, normalize_url, origin_of};
//!
//! let url = normalize_url("https://Example.com/post#comments").unwrap();
//! assert_eq!(url.as_str(), "https://example.com/post");
//! assert_eq!(origin_of(&url), "https://example.com");
//! assert_eq!(clean_text(" A  title ").as_deref(), Some("A title"));
//! ```

mod text;
mod url;

pub use self::text::{clean_text, strip_control_chars};
pub use self::url::{host_of_origin, host_within, normalize_url, origin_of, UrlError};
