//! HTTP environment parsing: CGI parameter ingestion, query/cookie/urlencoded decoding,
//! multipart form bodies, IPv6 addresses, and the session container.
//!
//! Grounded on spec §4.4; the PARAMS name dispatch and environment shape follow
//! `examples/original_source/include/fastcgi++/http.hpp` and `request.hpp`.

pub mod address;
pub mod multipart;
pub mod session;

use crate::encode::percent_decode;
use crate::http::address::Address;

/// A multimap preserving insertion order, used for query strings, cookies and urlencoded
/// POST fields (the same key may legitimately repeat, e.g. `a=1&a=2`).
#[derive(Debug, Clone, Default)]
pub struct MultiMap {
    pairs: Vec<(String, String)>,
}

impl MultiMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.pairs.push((key, value));
    }

    /// First value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, in arrival order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.pairs.iter().filter(move |(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Decodes a `key=value` field string separated by `sep` into a [`MultiMap`]. Used for both
/// query strings (`sep = '&'`) and cookie headers (`sep = ';'`), spec §4.4.
pub fn decode_fields(input: &str, sep: char) -> MultiMap {
    let mut map = MultiMap::new();
    for field in input.split(sep) {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let (key, value) = match field.split_once('=') {
            Some((k, v)) => (k, v),
            None => (field, ""),
        };
        let key = String::from_utf8_lossy(&percent_decode(key.as_bytes())).into_owned();
        let value = String::from_utf8_lossy(&percent_decode(value.as_bytes())).into_owned();
        map.insert(key, value);
    }
    map
}

/// Splits a `CONTENT_TYPE` header value into its bare type and an optional `boundary`
/// parameter, spec §4.4.
pub fn split_content_type(content_type: &str) -> (&str, Option<&str>) {
    let mut parts = content_type.split(';');
    let bare = parts.next().unwrap_or("").trim();
    let boundary = parts.find_map(|param| {
        let param = param.trim();
        param.strip_prefix("boundary=").map(|v| v.trim_matches('"'))
    });
    (bare, boundary)
}

/// Splits a URI path into percent-decoded, non-empty segments, spec §4.4.
pub fn path_info(uri: &str) -> Vec<String> {
    uri.split('/')
        .filter(|s| !s.is_empty())
        .map(|seg| String::from_utf8_lossy(&percent_decode(seg.as_bytes())).into_owned())
        .collect()
}

/// The parsed CGI/FastCGI request environment: the well-known `PARAMS` names spec §4.4
/// lists. Names it doesn't list are ignored.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub request_method: String,
    pub request_uri: String,
    pub script_name: String,
    pub document_root: String,
    pub query_string: String,
    pub content_type: String,
    pub content_length: usize,
    pub server_addr: Address,
    pub server_port: String,
    pub remote_addr: Address,
    pub remote_port: String,
    pub http_host: String,
    pub http_cookie: String,
    pub http_user_agent: String,
    pub http_referer: String,
    pub http_accept: String,
    pub http_accept_language: String,
    pub http_accept_charset: String,
    pub http_keep_alive: String,
    pub http_if_none_match: String,
    pub http_if_modified_since: String,
}

impl Environment {
    /// Feeds one decoded PARAMS name/value pair into the environment. Dispatch is by exact
    /// name match; unrecognized names are ignored, per spec §4.4.
    pub fn set(&mut self, name: &[u8], value: &[u8]) {
        let value = String::from_utf8_lossy(value).into_owned();
        match name {
            b"REQUEST_METHOD" => self.request_method = value,
            b"REQUEST_URI" => self.request_uri = value,
            b"SCRIPT_NAME" => self.script_name = value,
            b"DOCUMENT_ROOT" => self.document_root = value,
            b"QUERY_STRING" => self.query_string = value,
            b"CONTENT_TYPE" => self.content_type = value,
            b"CONTENT_LENGTH" => self.content_length = value.parse().unwrap_or(0),
            b"SERVER_ADDR" => self.server_addr = Self::parse_address("SERVER_ADDR", &value),
            b"SERVER_PORT" => self.server_port = value,
            b"REMOTE_ADDR" => self.remote_addr = Self::parse_address("REMOTE_ADDR", &value),
            b"REMOTE_PORT" => self.remote_port = value,
            b"HTTP_HOST" => self.http_host = value,
            b"HTTP_COOKIE" => self.http_cookie = value,
            b"HTTP_USER_AGENT" => self.http_user_agent = value,
            b"HTTP_REFERER" => self.http_referer = value,
            b"HTTP_ACCEPT" => self.http_accept = value,
            b"HTTP_ACCEPT_LANGUAGE" => self.http_accept_language = value,
            b"HTTP_ACCEPT_CHARSET" => self.http_accept_charset = value,
            b"HTTP_KEEP_ALIVE" => self.http_keep_alive = value,
            b"HTTP_IF_NONE_MATCH" => self.http_if_none_match = value,
            b"HTTP_IF_MODIFIED_SINCE" => self.http_if_modified_since = value,
            _ => {}
        }
    }

    /// Parses a `SERVER_ADDR`/`REMOTE_ADDR` value, spec §4.4. A malformed address (spec §8
    /// scenario 2) falls back to the zero address and logs a warning rather than rejecting
    /// the whole request.
    fn parse_address(field: &str, value: &str) -> Address {
        Address::parse(value).unwrap_or_else(|| {
            log::warn!("{field} {value:?} is not a valid address, defaulting to the zero address");
            Address::default()
        })
    }

    pub fn query(&self) -> MultiMap {
        decode_fields(&self.query_string, '&')
    }

    pub fn cookies(&self) -> MultiMap {
        decode_fields(&self.http_cookie, ';')
    }

    pub fn path_info(&self) -> Vec<String> {
        path_info(&self.request_uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_fields_preserves_order_and_repeats() {
        let map = decode_fields("a=1&b=hello+world&a=2", '&');
        assert_eq!(map.len(), 3);
        assert_eq!(map.get("a"), Some("1"));
        assert_eq!(map.get_all("a").collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(map.get("b"), Some("hello world"));
    }

    #[test]
    fn split_content_type_extracts_boundary() {
        let (bare, boundary) =
            split_content_type("multipart/form-data; boundary=\"----abc123\"");
        assert_eq!(bare, "multipart/form-data");
        assert_eq!(boundary, Some("----abc123"));
    }

    #[test]
    fn path_info_drops_empty_segments_and_decodes() {
        assert_eq!(path_info("/a//b%20c/"), vec!["a", "b c"]);
    }

    #[test]
    fn environment_routes_known_names_and_ignores_unknown_ones() {
        let mut env = Environment::default();
        env.set(b"REQUEST_METHOD", b"GET");
        env.set(b"X_CUSTOM_HEADER", b"value");
        assert_eq!(env.request_method, "GET");
    }

    #[test]
    fn environment_parses_addresses_and_defaults_malformed_ones_to_zero() {
        let mut env = Environment::default();
        env.set(b"SERVER_ADDR", b"192.0.2.1");
        assert_eq!(env.server_addr, Address::parse("192.0.2.1").unwrap());
        env.set(b"REMOTE_ADDR", b"not-an-address");
        assert_eq!(env.remote_addr, Address::default());
    }
}
