//! Decoding of `multipart/form-data` request bodies
//!
//! The decoder works on the fully buffered body: `post()` only ever needs
//! the complete form anyway.  Framing errors surface as protocol errors.

use httparse::{self, parse_headers, EMPTY_HEADER};

use stream::find;
use Error;


const MAX_PART_HEADERS: usize = 16;

/// Extract the `boundary` parameter from a Content-Type value
pub fn boundary(content_type: &str) -> Option<String> {
    for param in content_type.split(';').skip(1) {
        let param = param.trim();
        if param.len() >= 9 && param[..9].eq_ignore_ascii_case("boundary=") {
            let value = &param[9..];
            let value = value.trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Split a multipart message into `(field name, body)` pairs
pub fn parse_form(body: &[u8], boundary: &str)
    -> Result<Vec<(String, String)>, Error>
{
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut parts = Vec::new();

    // preamble up to the first delimiter is discarded
    let mut pos = match find(body, &delimiter) {
        Some(pos) => pos + delimiter.len(),
        None => return Err(Error::Protocol("multipart boundary not found")),
    };
    loop {
        // delimiter is followed by CRLF (next part) or "--" (message end)
        if body[pos..].starts_with(b"--") {
            return Ok(parts);
        }
        if !body[pos..].starts_with(b"\r\n") {
            return Err(Error::Protocol("malformed multipart delimiter"));
        }
        pos += 2;

        let mut headers = [EMPTY_HEADER; MAX_PART_HEADERS];
        let (head_len, name) = {
            let (head_len, headers) =
                match parse_headers(&body[pos..], &mut headers) {
                    Ok(httparse::Status::Complete(done)) => done,
                    Ok(httparse::Status::Partial) => {
                        return Err(Error::Protocol(
                            "truncated multipart part headers"));
                    }
                    Err(..) => {
                        return Err(Error::Protocol(
                            "malformed multipart part headers"));
                    }
                };
            let mut name = None;
            for header in headers {
                if header.name.eq_ignore_ascii_case("Content-Disposition") {
                    let value = ::std::str::from_utf8(header.value)
                        .map_err(|_| Error::Protocol(
                            "malformed multipart part headers"))?;
                    name = field_name(value);
                }
            }
            (head_len, name)
        };
        pos += head_len;

        let close = [&b"\r\n"[..], &delimiter[..]].concat();
        let data_len = match find(&body[pos..], &close) {
            Some(len) => len,
            None => return Err(Error::Protocol("unterminated multipart part")),
        };
        if let Some(name) = name {
            let text = String::from_utf8_lossy(&body[pos..pos + data_len]);
            parts.push((name, text.to_string()));
        }
        pos += data_len + close.len();
    }
}

/// The `name` parameter of a Content-Disposition value
fn field_name(value: &str) -> Option<String> {
    for param in value.split(';').skip(1) {
        let param = param.trim();
        if param.len() >= 5 && param[..5].eq_ignore_ascii_case("name=") {
            let value = param[5..].trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}


#[cfg(test)]
mod test {
    use Error;
    use super::{boundary, parse_form};

    #[test]
    fn boundary_parameter() {
        assert_eq!(
            boundary("multipart/form-data; boundary=xyz"),
            Some("xyz".to_string()));
        assert_eq!(
            boundary("multipart/form-data; charset=utf-8; \
                      boundary=\"quoted value\""),
            Some("quoted value".to_string()));
        assert_eq!(boundary("multipart/form-data"), None);
        assert_eq!(boundary("text/plain; charset=utf-8"), None);
    }

    #[test]
    fn two_fields() {
        let body = b"--AaB03x\r\n\
            Content-Disposition: form-data; name=\"greeting\"\r\n\
            \r\n\
            hello\r\n\
            --AaB03x\r\n\
            Content-Disposition: form-data; name=\"subject\"\r\n\
            \r\n\
            world\r\n\
            --AaB03x--\r\n";
        let parts = parse_form(body, "AaB03x").unwrap();
        assert_eq!(parts, vec![
            ("greeting".to_string(), "hello".to_string()),
            ("subject".to_string(), "world".to_string()),
        ]);
    }

    #[test]
    fn part_body_may_contain_crlf() {
        let body = b"--b\r\n\
            Content-Disposition: form-data; name=\"text\"\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            line one\r\nline two\r\n\
            --b--\r\n";
        let parts = parse_form(body, "b").unwrap();
        assert_eq!(parts, vec![
            ("text".to_string(), "line one\r\nline two".to_string()),
        ]);
    }

    #[test]
    fn unterminated_message() {
        let body = b"--b\r\n\
            Content-Disposition: form-data; name=\"x\"\r\n\
            \r\n\
            data without a closing delimiter";
        match parse_form(body, "b") {
            Err(Error::Protocol(..)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn missing_boundary() {
        match parse_form(b"irrelevant", "b") {
            Err(Error::Protocol(..)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
