//! Segment trie router used by quill.
//!
//! Patterns are registered per method (or for any method) and looked up by
//! `(method, path)`. See [`pattern`] for the supported pattern syntax.
//!
//! ```
//! use http::Method;
//! use quill_router::Router;
//!
//! let mut router = Router::new();
//! router.insert(Method::GET, "/users/:id", "user").unwrap();
//!
//! let found = router.find(&Method::GET, "/users/7").unwrap();
//! assert_eq!(*found.value, "user");
//! assert_eq!(found.params.get("id"), Some("7"));
//! ```

mod error;
mod params;
pub mod pattern;
mod router;

pub use error::ConfigurationError;
pub use params::{Params, percent_decode};
pub use pattern::Pattern;
pub use router::{Match, RouteMethod, Router};
