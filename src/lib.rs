//! A memoizing cache for asynchronous loads.
//!
//! The cache coalesces concurrent loads of the same logical resource into a single
//! in-flight computation, and remembers settled outcomes (values as well as failures)
//! for later lookups.
//!
//! Entries are identified by a [`CacheKey`], an ordered tuple of values that is
//! compared shallowly, position by position. [`LoaderCache::remember`] either serves
//! an existing entry or starts the caller's producer and records a new one;
//! [`LoaderCache::clear`] explicitly invalidates an entry. There is no expiry and no
//! capacity bound, and failures are sticky until cleared.
//!
//! # Example
//!
//! ```
//! use loader_cache::{CacheContents, CacheKey, LoaderCache};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> CacheContents<()> {
//! let cache: LoaderCache<String> = LoaderCache::new();
//!
//! let key = CacheKey::from_iter(["user", "u1"]);
//! let user = cache
//!     .remember(|| async { Ok("Jane".to_string()) }, key.clone())
//!     .await?;
//! assert_eq!(user.as_str(), "Jane");
//!
//! // A later lookup with a matching key is served from the cache;
//! // its producer is never invoked.
//! let again = cache
//!     .remember(|| async { unreachable!() }, key)
//!     .await?;
//! assert_eq!(again.as_str(), "Jane");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod cache;
mod error;
mod key;

pub use cache::*;
pub use error::*;
pub use key::*;
