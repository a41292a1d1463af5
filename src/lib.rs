//! # rttp-cache
//!
//! In-process HTTP response caching for rttp handler pipelines.
//!
//! [`CacheMiddleware`](cache::CacheMiddleware) sits in front of an expensive
//! handler, serves repeated `GET` requests from a pluggable byte store, and
//! reports the outcome in an `X-Cache: hit | miss | unreachable` header.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use rttp_cache::{Pipeline, Request, Response, StatusCode};
//! use rttp_cache::cache::{CacheMiddleware, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::new()
//!         .layer(CacheMiddleware::new(
//!             Config::new().expiration(Duration::from_secs(10)).cache_control(true),
//!         ))
//!         .handler(|_ctx| async { Response::new(StatusCode::Ok).body("Hello, World!") })
//!         .build();
//!
//!     let (request, _) = Request::parse(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
//!     let response = pipeline.dispatch(request).await;
//!     assert_eq!(response.headers().get("x-cache"), Some("miss"));
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod context;
pub mod http;
pub mod middleware;

pub use http::{Headers, Method, Request, Response, StatusCode};
pub use middleware::Pipeline;
