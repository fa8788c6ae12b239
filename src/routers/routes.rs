//! Route table shared by the hand-routed layers.
//!
//! `axum` brings its own matcher; the `hyper` and `native` layers resolve
//! requests here instead:
//! - `GET /ais/{ai}` -> echo the decoded segment (`HEAD` too, body omitted)
//! - `POST /ais` -> echo the body
//! - any other method on those paths -> 405
//! - anything else -> 404

/// Collection path for POST.
pub const COLLECTION: &str = "/ais";

/// Allowed methods reported with a 405, spelled the way axum spells them.
pub const ALLOW_COLLECTION: &str = "POST";
pub const ALLOW_ITEM: &str = "GET,HEAD";

/// Outcome of matching a method and request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `GET` or `HEAD /ais/{ai}` with the decoded segment.
    Get(String),
    /// `POST /ais`.
    Post,
    /// Known path, wrong method. Carries the `Allow` header value.
    MethodNotAllowed(&'static str),
    /// Segment did not decode to UTF-8.
    BadPath,
    NotFound,
}

/// Resolve a method and request target (path plus optional query).
pub fn resolve(method: &str, target: &str) -> Route {
    let path = target.split_once('?').map_or(target, |(path, _)| path);

    if path == COLLECTION {
        return if method == "POST" {
            Route::Post
        } else {
            Route::MethodNotAllowed(ALLOW_COLLECTION)
        };
    }

    let Some(segment) = path
        .strip_prefix(COLLECTION)
        .and_then(|rest| rest.strip_prefix('/'))
    else {
        return Route::NotFound;
    };

    // `{ai}` binds exactly one segment.
    if segment.contains('/') {
        return Route::NotFound;
    }

    if method != "GET" && method != "HEAD" {
        return Route::MethodNotAllowed(ALLOW_ITEM);
    }

    match percent_decode(segment) {
        Some(ai) => Route::Get(ai),
        None => Route::BadPath,
    }
}

/// Decode `%XX` escapes. Returns `None` when the result is not UTF-8.
///
/// Malformed escapes (`%G1`, trailing `%`) pass through literally, the way
/// most routers treat them. `+` is not a space in a path.
pub fn percent_decode(segment: &str) -> Option<String> {
    let decoded = urlencoding::decode_binary(segment.as_bytes());
    String::from_utf8(decoded.into_owned()).ok()
}
