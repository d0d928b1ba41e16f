//! Request head parsing and validation

use std::str::from_utf8;

use httparse;

use enums::{Method, Version};
use headers::{self, HeaderTable};
use server::{Config, Error};


/// Number of headers to allocate on a stack
const MIN_HEADERS: usize = 16;
/// A hard limit on the number of headers
const MAX_HEADERS: usize = 1024;

/// Body framing and decoding properties derived from the head
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFlags {
    /// Body of a known length (`Content-Length` > 0)
    pub bound_body: bool,
    /// Self-terminating chunked body
    pub unbound_body: bool,
    /// Body is a urlencoded form
    pub urlencoded_form: bool,
    /// Body is a multipart form
    pub multipart_form: bool,
    /// Client waits for `100 Continue` before sending the body
    pub client_expect: bool,
}

/// Set of the transfer/content codings named in a header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodingSet {
    pub identity: bool,
    pub chunked: bool,
    pub compress: bool,
    pub deflate: bool,
    pub gzip: bool,
    pub br: bool,
}

impl EncodingSet {
    fn insert(&mut self, token: &str, allow_br: bool) -> Result<(), ()> {
        match token {
            "identity" => self.identity = true,
            "chunked" => self.chunked = true,
            "compress" => self.compress = true,
            "deflate" => self.deflate = true,
            "gzip" => self.gzip = true,
            "br" if allow_br => self.br = true,
            _ => return Err(()),
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == EncodingSet::default()
    }
}

/// A parsed and validated request head
#[derive(Debug)]
pub struct Head {
    pub method: Method,
    pub version: Version,
    pub path: String,
    pub headers: HeaderTable,
    pub content_length: u64,
    pub transfer_encoding: EncodingSet,
    pub content_encoding: EncodingSet,
    pub flags: RequestFlags,
    pub connection_close: bool,
}

fn parse_encoding_header(table: &HeaderTable, name: &str, allow_br: bool)
    -> Result<EncodingSet, Error>
{
    let mut set = EncodingSet::default();
    if let Some(value) = table.get(name) {
        for token in headers::tokens(value) {
            set.insert(&token, allow_br)
                .map_err(|()| Error::BadRequest("unknown encoding token"))?;
        }
    }
    Ok(set)
}

fn check_scheme(path: &str) -> Result<(), Error> {
    if path.is_empty() {
        return Err(Error::BadRequest("empty request target"));
    }
    if path.starts_with('/') || path == "*" {
        return Ok(());
    }
    if let Some(idx) = path.find("://") {
        match &path[..idx] {
            "http" | "https" => return Ok(()),
            _ => return Err(Error::BadRequest("unsupported scheme")),
        }
    }
    Err(Error::BadRequest("malformed request target"))
}

/// Parse a complete request head (everything up to and including the
/// final CRLFCRLF)
pub fn parse_head(buf: &[u8], config: &Config) -> Result<Head, Error> {
    let mut vec;
    let mut headers_buf = [httparse::EMPTY_HEADER; MIN_HEADERS];
    let mut raw = httparse::Request::new(&mut headers_buf);
    let mut result = raw.parse(buf);
    if matches!(result, Err(httparse::Error::TooManyHeaders)) {
        vec = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
        raw = httparse::Request::new(&mut vec);
        result = raw.parse(buf);
    }
    match result {
        Ok(httparse::Status::Complete(..)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(Error::BadRequest("truncated request head"));
        }
        Err(httparse::Error::Version) => {
            return Err(Error::VersionNotSupported);
        }
        Err(e) => return Err(e.into()),
    }

    let method = raw.method
        .and_then(Method::from_name)
        .ok_or(Error::BadRequest("unknown method"))?;
    let version = match raw.version {
        Some(0) => Version::Http10,
        Some(1) => Version::Http11,
        _ => return Err(Error::VersionNotSupported),
    };
    let path = raw.path
        .ok_or(Error::BadRequest("empty request target"))?
        .to_string();
    check_scheme(&path)?;

    let mut table = HeaderTable::new();
    for header in raw.headers.iter() {
        let value = from_utf8(header.value)
            .map_err(|_| Error::BadRequest("header value is not text"))?;
        table.add(header.name, value);
    }

    for name in &["content-type", "content-length", "transfer-encoding"] {
        if table.count(name) > 1 {
            return Err(Error::BadRequest("duplicate entity header"));
        }
    }
    if table.count("host") > 1 {
        return Err(Error::BadRequest("duplicate host header"));
    }

    let transfer_encoding =
        parse_encoding_header(&table, "transfer-encoding", false)?;
    let content_encoding =
        parse_encoding_header(&table, "content-encoding", true)?;

    let mut content_length = 0;
    let has_length = table.contains("content-length");
    if has_length {
        // single occurrence is checked above
        let value = table.get("content-length").unwrap();
        content_length = value.trim().parse::<u64>()
            .map_err(|_| Error::BadRequest("invalid content-length"))?;
        if content_length > config.max_request_body_size {
            return Err(Error::BodyTooLarge);
        }
        if transfer_encoding.chunked {
            return Err(Error::BadRequest(
                "content-length conflicts with chunked encoding"));
        }
    }

    let mut flags = RequestFlags::default();
    flags.bound_body = content_length > 0;
    flags.unbound_body = !flags.bound_body && transfer_encoding.chunked;

    if method == Method::Trace && (flags.bound_body || flags.unbound_body) {
        return Err(Error::BadRequest("TRACE request with a body"));
    }

    if let Some(ctype) = table.get("content-type") {
        let ctype = ctype.trim();
        if starts_with_ignore_case(ctype, "application/x-www-form-urlencoded") {
            flags.urlencoded_form = true;
        } else if starts_with_ignore_case(ctype, "multipart/form-data") {
            flags.multipart_form = true;
        }
    }
    if let Some(expect) = table.get("expect") {
        if headers::is_value(expect, "100-continue") {
            flags.client_expect = true;
        }
    }

    let mut close = version == Version::Http10;
    if let Some(conn) = table.get("connection") {
        if headers::has_token(conn, "close") {
            close = true;
        } else if headers::has_token(conn, "keep-alive") {
            close = false;
        }
    }

    Ok(Head {
        method: method,
        version: version,
        path: path,
        headers: table,
        content_length: content_length,
        transfer_encoding: transfer_encoding,
        content_encoding: content_encoding,
        flags: flags,
        connection_close: close,
    })
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value.len() >= prefix.len() &&
        value[..prefix.len()].eq_ignore_ascii_case(prefix)
}


#[cfg(test)]
mod test {
    use enums::{Method, Version};
    use server::{Config, Error};
    use super::parse_head;

    fn parse(head: &[u8]) -> Result<super::Head, Error> {
        parse_head(head, &Config::new())
    }

    #[test]
    fn simple_get() {
        let head = parse(b"GET /path?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .unwrap();
        assert_eq!(head.method, Method::Get);
        assert_eq!(head.version, Version::Http11);
        assert_eq!(head.path, "/path?x=1");
        assert_eq!(head.headers.get("host"), Some("example.com"));
        assert_eq!(head.content_length, 0);
        assert!(!head.flags.bound_body);
        assert!(!head.flags.unbound_body);
        assert!(!head.connection_close);
    }

    #[test]
    fn http10_closes_by_default() {
        let head = parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(head.connection_close);
        let head = parse(
            b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").unwrap();
        assert!(!head.connection_close);
    }

    #[test]
    fn explicit_close() {
        let head = parse(
            b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(head.connection_close);
    }

    #[test]
    fn content_length_sets_bound_body() {
        let head = parse(
            b"POST /x HTTP/1.1\r\nContent-Length: 11\r\n\r\n").unwrap();
        assert!(head.flags.bound_body);
        assert_eq!(head.content_length, 11);
    }

    #[test]
    fn chunked_sets_unbound_body() {
        let head = parse(
            b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n")
            .unwrap();
        assert!(head.flags.unbound_body);
        assert!(head.transfer_encoding.chunked);
    }

    #[test]
    fn length_and_chunked_conflict() {
        let err = parse(
            b"POST /x HTTP/1.1\r\nContent-Length: 10\r\n\
              Transfer-Encoding: chunked\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::BadRequest(..)));
    }

    #[test]
    fn duplicate_content_length() {
        let err = parse(
            b"POST /x HTTP/1.1\r\nContent-Length: 10\r\n\
              Content-Length: 10\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::BadRequest(..)));
    }

    #[test]
    fn duplicate_content_type() {
        let err = parse(
            b"POST /x HTTP/1.1\r\nContent-Type: a/b\r\n\
              Content-Type: a/b\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::BadRequest(..)));
    }

    #[test]
    fn oversized_declared_body() {
        let err = parse(
            b"POST /x HTTP/1.1\r\nContent-Length: 999999999999\r\n\r\n")
            .unwrap_err();
        assert!(matches!(err, Error::BodyTooLarge));
    }

    #[test]
    fn unknown_transfer_coding() {
        let err = parse(
            b"POST /x HTTP/1.1\r\nTransfer-Encoding: sideways\r\n\r\n")
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(..)));
    }

    #[test]
    fn content_encoding_allows_br() {
        let head = parse(
            b"POST /x HTTP/1.1\r\nContent-Length: 2\r\n\
              Content-Encoding: br\r\n\r\n").unwrap();
        assert!(head.content_encoding.br);
        let err = parse(
            b"POST /x HTTP/1.1\r\nTransfer-Encoding: br\r\n\r\n")
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(..)));
    }

    #[test]
    fn trace_with_body_is_rejected() {
        let err = parse(
            b"TRACE /x HTTP/1.1\r\nContent-Length: 5\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::BadRequest(..)));
    }

    #[test]
    fn expect_continue_flag() {
        let head = parse(
            b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\
              Expect:  100-Continue \r\n\r\n").unwrap();
        assert!(head.flags.client_expect);
    }

    #[test]
    fn form_content_types() {
        let head = parse(
            b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\
              Content-Type: application/x-www-form-urlencoded\r\n\r\n")
            .unwrap();
        assert!(head.flags.urlencoded_form);
        let head = parse(
            b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\
              Content-Type: multipart/form-data; boundary=xx\r\n\r\n")
            .unwrap();
        assert!(head.flags.multipart_form);
    }

    #[test]
    fn unknown_method() {
        let err = parse(b"BREW /pot HTTP/1.1\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::BadRequest(..)));
    }

    #[test]
    fn absolute_target_with_bad_scheme() {
        let err = parse(b"GET ftp://x/ HTTP/1.1\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::BadRequest(..)));
        parse(b"GET http://x/ HTTP/1.1\r\n\r\n").unwrap();
    }

    #[test]
    fn unsupported_version() {
        let err = parse(b"GET / HTTP/2.0\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::VersionNotSupported));
    }
}
