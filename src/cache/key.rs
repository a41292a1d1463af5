use crate::context::Context;

/// Default cache key: the request path, plus `?` and the raw query string when
/// the target had one.
///
/// No normalization is applied. `/a?x=1&y=2` and `/a?y=2&x=1` are different
/// keys, and so are `/a` and `/a?`. The method is not part of the key.
///
/// # Examples
///
/// ```
/// use rttp_cache::{Request, cache::fingerprint, context::Context};
///
/// let (request, _) = Request::parse(b"GET /items?page=2 HTTP/1.1\r\n\r\n").unwrap();
/// assert_eq!(fingerprint(&Context::new(request)), "/items?page=2");
/// ```
pub fn fingerprint(ctx: &Context) -> String {
    let request = ctx.request();
    match request.query_string() {
        Some(query) => {
            let mut key = String::with_capacity(request.path().len() + 1 + query.len());
            key.push_str(request.path());
            key.push('?');
            key.push_str(query);
            key
        }
        None => request.path().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Request;

    fn key_for(method: &str, target: &str) -> String {
        let raw = format!("{method} {target} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (request, _) = Request::parse(raw.as_bytes()).unwrap();
        fingerprint(&Context::new(request))
    }

    #[test]
    fn path_only() {
        assert_eq!(key_for("GET", "/"), "/");
        assert_eq!(key_for("GET", "/users/42"), "/users/42");
    }

    #[test]
    fn query_is_literal() {
        assert_eq!(key_for("GET", "/a?x=1&y=2"), "/a?x=1&y=2");
        assert_ne!(key_for("GET", "/a?x=1&y=2"), key_for("GET", "/a?y=2&x=1"));
        assert_ne!(key_for("GET", "/a"), key_for("GET", "/a?"));
    }

    #[test]
    fn stable_across_requests() {
        assert_eq!(key_for("GET", "/r?q=1"), key_for("GET", "/r?q=1"));
    }

    #[test]
    fn method_is_ignored() {
        assert_eq!(key_for("GET", "/r?q=1"), key_for("POST", "/r?q=1"));
    }
}
