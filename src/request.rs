use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, Request};

use crate::config::TargetSpec;
use crate::error::PollError;

/// Build the request for one poll of `target`. Headers from the target always win; if a body
/// is sent without a content type, one is guessed from the body's shape.
pub fn build_request(client: &Client, target: &TargetSpec) -> Result<Request, PollError> {
    let method = if target.method.is_empty() {
        Method::GET
    } else {
        Method::from_bytes(target.method.as_bytes())
            .map_err(|e| PollError::RequestBuild(format!("method {:?}: {}", target.method, e)))?
    };

    let mut builder = client.request(method, &target.endpoint);
    if !target.body.is_empty() {
        builder = builder.body(target.body.clone());
    }

    let mut request = builder
        .build()
        .map_err(|e| PollError::RequestBuild(e.to_string()))?;

    // Set, not append: names differing only in case collapse to one value
    for (key, value) in &target.headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| PollError::RequestBuild(format!("header {:?}: {}", key, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| PollError::RequestBuild(format!("header {:?}: {}", key, e)))?;
        request.headers_mut().insert(name, value);
    }

    if !target.body.is_empty() && !request.headers().contains_key(CONTENT_TYPE) {
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(infer_content_type(&target.body)));
    }

    Ok(request)
}

pub fn infer_content_type(body: &str) -> &'static str {
    if body.trim().starts_with('{') {
        "application/json"
    } else {
        "text/plain"
    }
}
