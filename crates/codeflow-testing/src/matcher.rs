use http::{HeaderMap, Method};

/// Matcher for requests arriving at the mock token endpoint
#[derive(Debug, Clone, Default)]
pub struct RequestMatcher {
    pub(crate) method: Option<Method>,
    pub(crate) path: Option<String>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) form_params: Vec<(String, String)>,
    pub(crate) absent_form_params: Vec<String>,
}

impl RequestMatcher {
    /// Create a matcher that accepts every request
    pub fn new() -> Self {
        Self::default()
    }

    /// Matcher for an authorization code token request: `POST {path}` with a
    /// form body carrying `grant_type=authorization_code`
    pub fn token_request(path: impl Into<String>) -> Self {
        Self::new()
            .method(Method::POST)
            .path(path)
            .header("content-type", "application/x-www-form-urlencoded")
            .form_param("grant_type", "authorization_code")
    }

    /// Match a specific HTTP method
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Match a specific path
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Match a specific header value
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Require a form-urlencoded body parameter with this value
    pub fn form_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form_params.push((key.into(), value.into()));
        self
    }

    /// Require a form-urlencoded body parameter to be absent
    pub fn without_form_param(mut self, key: impl Into<String>) -> Self {
        self.absent_form_params.push(key.into());
        self
    }

    /// Check if the matcher matches a request
    pub fn matches(&self, method: &Method, path: &str, headers: &HeaderMap, body: &[u8]) -> bool {
        if let Some(m) = &self.method {
            if m != method {
                return false;
            }
        }

        if let Some(p) = &self.path {
            if p != path {
                return false;
            }
        }

        for (k, v) in &self.headers {
            match headers.get(k) {
                Some(val) if val == v.as_str() => {}
                _ => return false,
            }
        }

        if self.form_params.is_empty() && self.absent_form_params.is_empty() {
            return true;
        }

        let form = parse_form(body);
        let has = |key: &str| form.iter().any(|(k, _)| k == key);

        self.form_params
            .iter()
            .all(|(key, value)| form.iter().any(|(k, v)| k == key && v == value))
            && !self.absent_form_params.iter().any(|key| has(key))
    }
}

/// Decode a form-urlencoded body into ordered key/value pairs
pub fn parse_form(body: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}
