//! Request context handed to an endpoint

use crate::error::{PluginError, Result};
use crate::scope::BoundaryScope;
use bytes::{Bytes, BytesMut};
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Response, StatusCode, Uri};
use http_body_util::Full;
use serde::Serialize;

/// Live request context passed to [`Endpoint::execute`](crate::Endpoint::execute)
#[derive(Debug)]
pub struct EndpointContext {
    request_id: String,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    response: ResponseWriter,
    scope: BoundaryScope,
}

impl EndpointContext {
    /// Create a context for one request inside `scope`
    pub fn new(
        request_id: impl Into<String>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        scope: BoundaryScope,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            method,
            uri,
            headers,
            body,
            response: ResponseWriter::new(),
            scope,
        }
    }

    /// Unique request ID
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Request method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request URI
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Request path, without the query string
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Buffered request body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decode the request body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(PluginError::from)
    }

    /// Response channel
    pub fn response(&mut self) -> &mut ResponseWriter {
        &mut self.response
    }

    /// Read-only view of the response channel
    pub fn response_ref(&self) -> &ResponseWriter {
        &self.response
    }

    /// Handle to the boundary this endpoint runs in
    pub fn scope(&self) -> &BoundaryScope {
        &self.scope
    }

    /// Consume the context, releasing its boundary anchor, and return what
    /// the endpoint wrote
    pub fn into_response(self) -> ResponseWriter {
        self.response
    }
}

/// Response channel of one request
///
/// The response counts as started on the first body write (or an explicit
/// [`ResponseWriter::start`]); after that status and headers are frozen.
#[derive(Debug)]
pub struct ResponseWriter {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    started: bool,
}

impl ResponseWriter {
    /// Create an empty, unstarted response
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            started: false,
        }
    }

    /// Whether anything has been committed to the response
    pub fn has_started(&self) -> bool {
        self.started
    }

    /// Current status code
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Current headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Bytes written so far
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Set the status code
    pub fn set_status(&mut self, status: StatusCode) -> Result<()> {
        self.ensure_not_started("status")?;
        self.status = status;
        Ok(())
    }

    /// Insert a header, replacing any previous value
    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<()> {
        self.ensure_not_started("headers")?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Commit status and headers without a body
    pub fn start(&mut self) {
        self.started = true;
    }

    /// Append raw bytes to the body
    pub fn write(&mut self, bytes: impl AsRef<[u8]>) {
        self.started = true;
        self.body.extend_from_slice(bytes.as_ref());
    }

    /// Append UTF-8 text to the body
    pub fn write_str(&mut self, text: &str) {
        self.write(text.as_bytes());
    }

    /// Serialize `value` as JSON into the body
    ///
    /// Sets `content-type: application/json` when the response has not
    /// started and no content type was chosen yet.
    pub fn write_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let json = serde_json::to_vec(value)?;
        if !self.started && !self.headers.contains_key(header::CONTENT_TYPE) {
            self.headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
        self.write(json);
        Ok(())
    }

    /// Convert into an HTTP response
    pub fn into_http(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body.freeze()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }

    /// Deep copy sharing no memory with the original
    ///
    /// Header values written by endpoint code may point into the module's
    /// static data; the host detaches a response before the module can be
    /// closed.
    pub fn detach(self) -> Self {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_str().as_bytes());
            let copied = HeaderValue::from_bytes(value.as_bytes());
            if let (Ok(name), Ok(mut copied)) = (name, copied) {
                copied.set_sensitive(value.is_sensitive());
                headers.append(name, copied);
            }
        }

        Self {
            status: self.status,
            headers,
            body: BytesMut::from(&self.body[..]),
            started: self.started,
        }
    }

    fn ensure_not_started(&self, what: &str) -> Result<()> {
        if self.started {
            Err(PluginError::response_started(format!(
                "cannot change {} after the body was written",
                what
            )))
        } else {
            Ok(())
        }
    }
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_starts_on_write() {
        let mut writer = ResponseWriter::new();
        assert!(!writer.has_started());

        writer.set_status(StatusCode::CREATED).unwrap();
        writer.write_str("created");

        assert!(writer.has_started());
        assert_eq!(writer.status(), StatusCode::CREATED);
        assert_eq!(writer.body(), b"created");
    }

    #[test]
    fn test_status_frozen_after_start() {
        let mut writer = ResponseWriter::new();
        writer.write(b"partial");

        let err = writer.set_status(StatusCode::BAD_REQUEST).unwrap_err();
        assert!(matches!(err, PluginError::ResponseStarted(_)));
        assert!(writer
            .insert_header(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))
            .is_err());
        assert_eq!(writer.status(), StatusCode::OK);
    }

    #[test]
    fn test_write_json_sets_content_type() {
        let mut writer = ResponseWriter::new();
        writer
            .write_json(&serde_json::json!({ "Message": "yo! Gotchabc!" }))
            .unwrap();

        let response = writer.into_http();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_detach_copies_headers_and_body() {
        const JSON: &str = "application/json";
        let mut writer = ResponseWriter::new();
        writer
            .insert_header(header::CONTENT_TYPE, HeaderValue::from_static(JSON))
            .unwrap();
        writer
            .insert_header(
                HeaderName::from_static("x-plugin"),
                HeaderValue::from_static("one"),
            )
            .unwrap();
        writer.set_status(StatusCode::ACCEPTED).unwrap();
        writer.write_str("body");
        let body_ptr = writer.body().as_ptr();

        let detached = writer.detach();

        let content_type = detached.headers().get(header::CONTENT_TYPE).unwrap();
        assert_eq!(content_type, JSON);
        assert_ne!(content_type.as_bytes().as_ptr(), JSON.as_ptr());
        assert_eq!(detached.headers().get("x-plugin").unwrap(), "one");
        assert_eq!(detached.status(), StatusCode::ACCEPTED);
        assert_eq!(detached.body(), b"body");
        assert_ne!(detached.body().as_ptr(), body_ptr);
        assert!(detached.has_started());
    }

    #[test]
    fn test_explicit_start_without_body() {
        let mut writer = ResponseWriter::new();
        writer.set_status(StatusCode::NO_CONTENT).unwrap();
        writer.start();

        assert!(writer.has_started());
        assert!(writer.body().is_empty());
        assert_eq!(writer.into_http().status(), StatusCode::NO_CONTENT);
    }
}
