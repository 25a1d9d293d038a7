use std::any::Any;

use crate::headers::H2Header;

/// An outbound request handed to a connection's worker.
///
/// The worker opens a stream for it, sends the headers and then pulls the
/// body through [`crate::StreamHandler::on_data_needed`] until the handler
/// reports it finished. Requests built with [`Request::without_body`] end
/// the stream on the HEADERS frame.
pub struct Request {
    pub(crate) headers: Vec<H2Header>,
    pub(crate) user_data: Option<Box<dyn Any + Send>>,
    pub(crate) has_body: bool,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("headers", &self.headers)
            .field("user_data", &self.user_data.is_some())
            .field("has_body", &self.has_body)
            .finish()
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl Request {
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
            user_data: None,
            has_body: true,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(H2Header::new(name, value));
        self
    }

    pub fn headers(mut self, headers: impl IntoIterator<Item = H2Header>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Attached to the stream once it is opened; reachable from every
    /// callback through [`crate::H2Codec::user_data_mut`].
    pub fn with_user_data(mut self, data: Box<dyn Any + Send>) -> Self {
        self.user_data = Some(data);
        self
    }

    pub fn without_body(mut self) -> Self {
        self.has_body = false;
        self
    }

    pub fn header_list(&self) -> &[H2Header] {
        &self.headers
    }

    pub fn has_body(&self) -> bool {
        self.has_body
    }
}
