use serde::de::DeserializeOwned;
use serde::Serialize;

const CONTENT_TYPE: &str = "Content-Type";

/// An owned HTTP-style response produced by a tool call.
///
/// Tools do not talk to a socket directly; the hosting platform turns this
/// value into whatever transport it fronts. Status, headers and body are
/// plain data so responses can be asserted on in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    /// Create an empty response with the given status code.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Append a header. Later values for the same name win on lookup;
    /// insertion order is preserved.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body bytes.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// A 200 response with `data` serialized to JSON.
    pub fn json<T: Serialize>(data: &T) -> Self {
        Self::json_with_status(200, data)
    }

    /// A JSON response with an explicit status code.
    pub fn json_with_status<T: Serialize>(status: u16, data: &T) -> Self {
        match serde_json::to_vec(data) {
            Ok(body) => Self::new(status)
                .with_header(CONTENT_TYPE, "application/json")
                .with_body(body),
            Err(err) => Self::new(500)
                .with_header(CONTENT_TYPE, "application/json")
                .with_body(
                    serde_json::json!({
                        "error": format!("failed to serialize response body: {err}"),
                    })
                    .to_string(),
                ),
        }
    }

    /// A 200 plain-text response.
    pub fn text(data: impl Into<String>) -> Self {
        Self::new(200)
            .with_header(CONTENT_TYPE, "text/plain;charset=UTF-8")
            .with_body(data.into())
    }

    /// A 200 Markdown response.
    pub fn markdown(data: impl Into<String>) -> Self {
        Self::new(200)
            .with_header(CONTENT_TYPE, "text/markdown;charset=UTF-8")
            .with_body(data.into())
    }

    /// A 200 HTML response.
    pub fn html(data: impl Into<String>) -> Self {
        Self::new(200)
            .with_header(CONTENT_TYPE, "text/html")
            .with_body(data.into())
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Look up a header by case-insensitive name, returning the last value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body decoded as UTF-8, with invalid sequences replaced.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}
