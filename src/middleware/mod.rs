//! Middleware pipeline: the handler chain the cache sits in front of.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware, including
//!   [`CacheMiddleware`](crate::cache::CacheMiddleware).
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable chain entry.
//! - [`Pipeline`]: ordered middleware layers in front of a terminal handler.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{Request, Response, StatusCode, context::Context};

/// Boxed future returned by middleware and handlers.
pub type BoxResponseFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A type-erased, reference-counted entry in the chain.
///
/// Construct one with [`from_middleware`] or by wrapping a closure directly:
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_cache::{context::Context, middleware::{MiddlewareHandler, Next}};
///
/// let handler: MiddlewareHandler = Arc::new(|ctx: Context, next: Next| {
///     Box::pin(async move { next.run(ctx).await })
/// });
/// ```
pub type MiddlewareHandler =
    Arc<dyn Fn(Context, Next) -> BoxResponseFuture + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a middleware can forward a
/// request at most once. The cache relies on this: a miss invokes the
/// downstream handler exactly one time.
pub struct Next {
    chain: Arc<[MiddlewareHandler]>,
    // Position of the entry invoked by the next `run` call.
    index: usize,
}

impl Next {
    /// Creates a cursor positioned at the start of `chain`.
    pub fn new(chain: Arc<[MiddlewareHandler]>) -> Self {
        Self { chain, index: 0 }
    }

    /// Invokes the next entry in the chain and returns its response.
    ///
    /// When the chain is exhausted without any entry producing a response, a
    /// `500 Internal Server Error` is returned.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.chain.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline"),
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors may pass through (`next.run(ctx).await`), short-circuit by
/// returning a [`Response`] without calling `next`, or decorate the response
/// returned by `next`.
///
/// Implementations are shared across Tokio tasks and must be `Send + Sync`;
/// the returned future must be `Send`.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> BoxResponseFuture;
}

/// An ordered stack of middleware terminated by a handler.
///
/// Layers run in the order they were added; the handler runs last and never
/// sees `Next`. A pipeline without a handler answers `500`.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_cache::{Pipeline, Response, StatusCode, cache::{CacheMiddleware, Config}};
///
/// # async fn example(request: rttp_cache::Request) {
/// let pipeline = Pipeline::new()
///     .layer(CacheMiddleware::new(Config::default()))
///     .handler(|_ctx| async { Response::new(StatusCode::Ok).body("expensive") });
///
/// let response = pipeline.dispatch(request).await;
/// # }
/// ```
#[derive(Default)]
pub struct Pipeline {
    layers: Vec<MiddlewareHandler>,
    handler: Option<MiddlewareHandler>,
    chain: Option<Arc<[MiddlewareHandler]>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware layer.
    #[must_use]
    pub fn layer<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.layers.push(from_middleware(Arc::new(middleware)));
        self.chain = None;
        self
    }

    /// Sets the terminal handler, replacing any previous one.
    #[must_use]
    pub fn handler<H, F>(mut self, handler: H) -> Self
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let entry: MiddlewareHandler =
            Arc::new(move |ctx: Context, _next: Next| Box::pin(handler(ctx)) as BoxResponseFuture);
        self.handler = Some(entry);
        self.chain = None;
        self
    }

    /// Runs `request` through every layer and the handler.
    pub async fn dispatch(&self, request: Request) -> Response {
        Next::new(self.chain()).run(Context::new(request)).await
    }

    // Layers followed by the handler, built once and shared by every dispatch.
    fn chain(&self) -> Arc<[MiddlewareHandler]> {
        if let Some(chain) = &self.chain {
            return Arc::clone(chain);
        }
        self.layers.iter().chain(self.handler.iter()).cloned().collect()
    }

    /// Freezes the chain so subsequent dispatches reuse one allocation.
    #[must_use]
    pub fn build(mut self) -> Self {
        self.chain = Some(self.chain());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag(&'static str);

    impl Middleware for Tag {
        fn handle(&self, ctx: Context, next: Next) -> BoxResponseFuture {
            let tag = self.0;
            Box::pin(async move {
                let mut response = next.run(ctx).await;
                response.add_header("X-Trail", tag);
                response
            })
        }
    }

    struct Teapot;

    impl Middleware for Teapot {
        fn handle(&self, _ctx: Context, _next: Next) -> BoxResponseFuture {
            Box::pin(async { Response::new(StatusCode::ImATeapot) })
        }
    }

    fn request(path: &str) -> Request {
        let raw = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    #[tokio::test]
    async fn handler_only() {
        let pipeline = Pipeline::new()
            .handler(|ctx: Context| async move {
                Response::new(StatusCode::Ok).body(ctx.request().path().to_owned())
            })
            .build();
        let res = pipeline.dispatch(request("/hello")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.payload().as_ref(), b"/hello");
    }

    #[tokio::test]
    async fn layers_unwind_in_reverse_order() {
        let pipeline = Pipeline::new()
            .layer(Tag("outer"))
            .layer(Tag("inner"))
            .handler(|_ctx| async { Response::new(StatusCode::Ok) });
        let res = pipeline.dispatch(request("/")).await;
        let trail: Vec<_> = res
            .headers()
            .iter()
            .filter(|(name, _)| *name == "X-Trail")
            .map(|(_, value)| value)
            .collect();
        assert_eq!(trail, vec!["inner", "outer"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_handler() {
        let pipeline = Pipeline::new()
            .layer(Teapot)
            .handler(|_ctx| async { Response::new(StatusCode::Ok) });
        let res = pipeline.dispatch(request("/")).await;
        assert_eq!(res.status(), StatusCode::ImATeapot);
    }

    #[tokio::test]
    async fn exhausted_chain_answers_500() {
        let res = Pipeline::new().dispatch(request("/")).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }
}
