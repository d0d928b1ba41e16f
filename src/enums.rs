use std::fmt;


/// Enum representing HTTP version.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum Version {
    /// Version 1.0 of the HTTP protocol
    Http10,
    /// Version 1.1 of the HTTP protocol
    Http11,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Version::Http10 => f.write_str("HTTP/1.0"),
            Version::Http11 => f.write_str("HTTP/1.1"),
        }
    }
}

/// Enum representing HTTP request methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Options,
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Trace,
    Connect,
}

impl Method {
    /// Parse a method name; only the nine RFC 7231/5789 methods are known
    pub fn from_name(name: &str) -> Option<Method> {
        match name {
            "OPTIONS" => Some(Method::Options),
            "GET" => Some(Method::Get),
            "HEAD" => Some(Method::Head),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            "TRACE" => Some(Method::Trace),
            "CONNECT" => Some(Method::Connect),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            Method::Options => "OPTIONS",
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
        }
    }

    /// Methods that may carry a form body decoded by `post()`
    pub fn may_post(&self) -> bool {
        matches!(*self,
            Method::Post | Method::Patch | Method::Put | Method::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enum with the HTTP status codes this crate emits or inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Continue,                   // 100
    SwitchingProtocol,          // 101
    Ok,                         // 200
    Created,                    // 201
    Accepted,                   // 202
    NoContent,                  // 204
    PartialContent,             // 206
    MovedPermanently,           // 301
    Found,                      // 302
    SeeOther,                   // 303
    NotModified,                // 304
    TemporaryRedirect,          // 307
    PermanentRedirect,          // 308
    BadRequest,                 // 400
    Unauthorized,               // 401
    Forbidden,                  // 403
    NotFound,                   // 404
    MethodNotAllowed,           // 405
    NotAcceptable,              // 406
    RequestTimeout,             // 408
    Conflict,                   // 409
    Gone,                       // 410
    LengthRequired,             // 411
    PreconditionFailed,         // 412
    RequestEntityTooLarge,      // 413
    RequestURITooLong,          // 414
    UnsupportedMediaType,       // 415
    ExpectationFailed,          // 417
    TooManyRequests,            // 429
    InternalServerError,        // 500
    NotImplemented,             // 501
    BadGateway,                 // 502
    ServiceUnavailable,         // 503
    GatewayTimeout,             // 504
    VersionNotSupported,        // 505
}

impl Status {
    pub fn from_code(code: u16) -> Option<Status> {
        use self::Status::*;
        match code {
            100 => Some(Continue),
            101 => Some(SwitchingProtocol),
            200 => Some(Ok),
            201 => Some(Created),
            202 => Some(Accepted),
            204 => Some(NoContent),
            206 => Some(PartialContent),
            301 => Some(MovedPermanently),
            302 => Some(Found),
            303 => Some(SeeOther),
            304 => Some(NotModified),
            307 => Some(TemporaryRedirect),
            308 => Some(PermanentRedirect),
            400 => Some(BadRequest),
            401 => Some(Unauthorized),
            403 => Some(Forbidden),
            404 => Some(NotFound),
            405 => Some(MethodNotAllowed),
            406 => Some(NotAcceptable),
            408 => Some(RequestTimeout),
            409 => Some(Conflict),
            410 => Some(Gone),
            411 => Some(LengthRequired),
            412 => Some(PreconditionFailed),
            413 => Some(RequestEntityTooLarge),
            414 => Some(RequestURITooLong),
            415 => Some(UnsupportedMediaType),
            417 => Some(ExpectationFailed),
            429 => Some(TooManyRequests),
            500 => Some(InternalServerError),
            501 => Some(NotImplemented),
            502 => Some(BadGateway),
            503 => Some(ServiceUnavailable),
            504 => Some(GatewayTimeout),
            505 => Some(VersionNotSupported),
            _ => None,
        }
    }

    pub fn code(&self) -> u16 {
        use self::Status::*;
        match *self {
            Continue => 100,
            SwitchingProtocol => 101,
            Ok => 200,
            Created => 201,
            Accepted => 202,
            NoContent => 204,
            PartialContent => 206,
            MovedPermanently => 301,
            Found => 302,
            SeeOther => 303,
            NotModified => 304,
            TemporaryRedirect => 307,
            PermanentRedirect => 308,
            BadRequest => 400,
            Unauthorized => 401,
            Forbidden => 403,
            NotFound => 404,
            MethodNotAllowed => 405,
            NotAcceptable => 406,
            RequestTimeout => 408,
            Conflict => 409,
            Gone => 410,
            LengthRequired => 411,
            PreconditionFailed => 412,
            RequestEntityTooLarge => 413,
            RequestURITooLong => 414,
            UnsupportedMediaType => 415,
            ExpectationFailed => 417,
            TooManyRequests => 429,
            InternalServerError => 500,
            NotImplemented => 501,
            BadGateway => 502,
            ServiceUnavailable => 503,
            GatewayTimeout => 504,
            VersionNotSupported => 505,
        }
    }

    pub fn reason(&self) -> &'static str {
        use self::Status::*;
        match *self {
            Continue => "Continue",
            SwitchingProtocol => "Switching Protocol",
            Ok => "OK",
            Created => "Created",
            Accepted => "Accepted",
            NoContent => "No Content",
            PartialContent => "Partial Content",
            MovedPermanently => "Moved Permanently",
            Found => "Found",
            SeeOther => "See Other",
            NotModified => "Not Modified",
            TemporaryRedirect => "Temporary Redirect",
            PermanentRedirect => "Permanent Redirect",
            BadRequest => "Bad Request",
            Unauthorized => "Unauthorized",
            Forbidden => "Forbidden",
            NotFound => "Not Found",
            MethodNotAllowed => "Method Not Allowed",
            NotAcceptable => "Not Acceptable",
            RequestTimeout => "Request Timeout",
            Conflict => "Conflict",
            Gone => "Gone",
            LengthRequired => "Length Required",
            PreconditionFailed => "Precondition Failed",
            RequestEntityTooLarge => "Request Entity Too Large",
            RequestURITooLong => "Request-URI Too Long",
            UnsupportedMediaType => "Unsupported Media Type",
            ExpectationFailed => "Expectation Failed",
            TooManyRequests => "Too Many Requests",
            InternalServerError => "Internal Server Error",
            NotImplemented => "Not Implemented",
            BadGateway => "Bad Gateway",
            ServiceUnavailable => "Service Unavailable",
            GatewayTimeout => "Gateway Timeout",
            VersionNotSupported => "HTTP Version Not Supported",
        }
    }

    /// Responses that must not carry a message body
    pub fn body_denied(&self) -> bool {
        let code = self.code();
        (code >= 100 && code < 200) || code == 204 || code == 304
    }
}


#[cfg(test)]
mod test {
    use super::{Method, Status, Version};

    #[test]
    fn version_display() {
        assert_eq!(format!("{}", Version::Http10), "HTTP/1.0");
        assert_eq!(format!("{}", Version::Http11), "HTTP/1.1");
    }

    #[test]
    fn method_round_trip() {
        for name in &["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE",
                      "OPTIONS", "TRACE", "CONNECT"] {
            let m = Method::from_name(name).unwrap();
            assert_eq!(m.as_str(), *name);
        }
        assert!(Method::from_name("BREW").is_none());
        assert!(Method::from_name("get").is_none());
    }

    #[test]
    fn status_codes() {
        assert_eq!(Status::Ok.code(), 200);
        assert_eq!(Status::Ok.reason(), "OK");
        assert_eq!(Status::RequestEntityTooLarge.code(), 413);
        assert_eq!(Status::from_code(408), Some(Status::RequestTimeout));
        assert!(Status::from_code(999).is_none());
        assert!(Status::NoContent.body_denied());
        assert!(Status::Continue.body_denied());
        assert!(!Status::Ok.body_denied());
    }
}
