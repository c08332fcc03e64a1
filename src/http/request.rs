/// HTTP/1.1 request reading, bounded in size and time.
use std::io::{self, Read};
use thiserror::Error;
use url::Url;

const READ_CHUNK: usize = 4096;
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("request exceeds {0} bytes")]
    TooLarge(usize),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("connection closed before the request was complete")]
    Incomplete,

    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

impl RequestError {
    /// Status to answer with, or `None` when the peer is gone
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::TooLarge(_) => Some(413),
            RequestError::Malformed(_) => Some(400),
            RequestError::Incomplete => None,
            RequestError::Io(e) => match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Some(408),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    /// Header names are lowercased
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Build a request from a method and an origin-form target such as `/a?b=c`
    pub fn new(method: &str, target: &str, body: impl Into<Vec<u8>>) -> Result<Self, RequestError> {
        let (path, query) = parse_target(target)?;
        Ok(Self {
            method: method.to_ascii_uppercase(),
            path,
            query,
            headers: Vec::new(),
            body: body.into(),
        })
    }

    /// First value of a query parameter
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

fn parse_target(target: &str) -> Result<(String, Vec<(String, String)>), RequestError> {
    if !target.starts_with('/') {
        return Err(RequestError::Malformed(format!(
            "unsupported request target '{}'",
            target
        )));
    }
    let url = Url::parse(&format!("http://localhost{}", target))
        .map_err(|e| RequestError::Malformed(format!("bad request target: {}", e)))?;
    let query = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    Ok((url.path().to_string(), query))
}

/// Read one request. Head plus body may not exceed `max_bytes`.
pub fn read_request<R: Read>(reader: &mut R, max_bytes: usize) -> Result<Request, RequestError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    let head_len = loop {
        if let Some(pos) = find_terminator(&buf) {
            break pos + HEAD_TERMINATOR.len();
        }
        if buf.len() > max_bytes {
            return Err(RequestError::TooLarge(max_bytes));
        }
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Err(RequestError::Incomplete);
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = std::str::from_utf8(&buf[..head_len - HEAD_TERMINATOR.len()])
        .map_err(|_| RequestError::Malformed("request head is not UTF-8".to_string()))?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v)) if parts.next().is_none() => (m, t, v),
        _ => {
            return Err(RequestError::Malformed(format!(
                "bad request line '{}'",
                request_line
            )))
        }
    };
    if !version.starts_with("HTTP/1.") {
        return Err(RequestError::Malformed(format!("unsupported version {}", version)));
    }

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| RequestError::Malformed(format!("bad header line '{}'", line)))?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    let mut request = Request::new(method, target, Vec::<u8>::new())?;
    request.headers = headers;

    if request.header("transfer-encoding").is_some() {
        return Err(RequestError::Malformed(
            "chunked request bodies are not supported".to_string(),
        ));
    }
    let content_length = match request.header("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed(format!("bad content-length '{}'", value)))?,
        None => 0,
    };
    if head_len.saturating_add(content_length) > max_bytes {
        return Err(RequestError::TooLarge(max_bytes));
    }

    let mut body = buf.split_off(head_len);
    while body.len() < content_length {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Err(RequestError::Incomplete);
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);
    request.body = body;
    Ok(request)
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
}
