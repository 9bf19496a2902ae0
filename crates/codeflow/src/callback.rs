//! Recognizing redirect callbacks and reading their query parameters.

use url::Url;

/// Parameters of a redirect callback that matched the configured redirect URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CallbackParams {
    pub(crate) code: Option<String>,
    pub(crate) state: Option<String>,
}

/// Whether `candidate` points at the same endpoint as `redirect`.
///
/// Scheme, host, port and path must agree; query and fragment are ignored.
/// A trailing slash on either path is not significant.
pub(crate) fn matches_redirect(redirect: &Url, candidate: &Url) -> bool {
    redirect.scheme() == candidate.scheme()
        && redirect.host_str() == candidate.host_str()
        && redirect.port_or_known_default() == candidate.port_or_known_default()
        && redirect.path().trim_end_matches('/') == candidate.path().trim_end_matches('/')
}

/// Parse `callback` and read its `code` and `state` when it matches `redirect`.
pub(crate) fn parse_callback(redirect: &Url, callback: &str) -> Option<CallbackParams> {
    let candidate = Url::parse(callback.trim()).ok()?;
    if !matches_redirect(redirect, &candidate) {
        return None;
    }

    let mut params = CallbackParams {
        code: None,
        state: None,
    };
    for (key, value) in candidate.query_pairs() {
        match key.as_ref() {
            "code" if params.code.is_none() && !value.is_empty() => {
                params.code = Some(value.into_owned())
            }
            "state" if params.state.is_none() => params.state = Some(value.into_owned()),
            _ => {}
        }
    }
    Some(params)
}
