pub mod csrf;
pub mod password;
pub mod session;

use std::collections::HashMap;

use axum::http::{header::COOKIE, HeaderMap};

/// Parse the request `Cookie` header into name/value pairs.
pub fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                cookies.insert(name.trim().to_owned(), value.trim().to_owned());
            }
        }
    }
    cookies
}
