//! Request descriptors: the logical description of one upstream call.
//!
//! A descriptor is immutable once built. Path parameters are substituted into
//! `{name}` placeholders at build time, so the rendered path and the cache key
//! are computed exactly once.

use crate::category::ResourceCategory;
use crate::error::GatewayError;
use http::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Prefix shared by every cache key
pub const CACHE_KEY_PREFIX: &str = "bloxapi";

/// Immutable description of one logical upstream request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    category: ResourceCategory,
    method: Method,
    template: String,
    path_params: Vec<(String, String)>,
    query: BTreeMap<String, String>,
    body: Option<Value>,
    cacheable: bool,
    path: String,
    cache_key: String,
}

impl RequestDescriptor {
    /// Start building a GET descriptor for the given category and path template
    #[must_use]
    pub fn builder(category: ResourceCategory, template: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            category,
            method: Method::GET,
            template: template.into(),
            path_params: Vec::new(),
            query: BTreeMap::new(),
            body: None,
            cacheable: None,
        }
    }

    /// Resource category
    #[must_use]
    pub fn category(&self) -> ResourceCategory {
        self.category
    }

    /// HTTP method
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path template as supplied (with placeholders)
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Path parameters, in the order they were supplied
    #[must_use]
    pub fn path_params(&self) -> &[(String, String)] {
        &self.path_params
    }

    /// Query parameters, sorted by name
    #[must_use]
    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    /// JSON body, if any
    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Rendered path with all placeholders substituted
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether successful responses for this descriptor may be cached
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// Deterministic cache key derived from category, method, path, query and body
    #[must_use]
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    fn compute_cache_key(
        category: ResourceCategory,
        method: &Method,
        path: &str,
        query: &BTreeMap<String, String>,
        body: Option<&Value>,
    ) -> String {
        let mut key = format!("{CACHE_KEY_PREFIX}:{category}:{method}:{path}");
        if !query.is_empty() {
            let rendered: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
            key.push('?');
            key.push_str(&rendered.join("&"));
        }
        if let Some(body) = body {
            // serde_json maps are ordered, so this rendering is canonical
            key.push('#');
            key.push_str(&body.to_string());
        }
        key
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.method, self.path, self.category)
    }
}

/// Builder for [`RequestDescriptor`]
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    category: ResourceCategory,
    method: Method,
    template: String,
    path_params: Vec<(String, String)>,
    query: BTreeMap<String, String>,
    body: Option<Value>,
    cacheable: Option<bool>,
}

impl DescriptorBuilder {
    /// Set the HTTP method
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Bind a value to a `{name}` placeholder in the template
    #[must_use]
    pub fn path_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.path_params.push((name.into(), value.to_string()));
        self
    }

    /// Add a query parameter (a repeated name replaces the earlier value)
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.insert(name.into(), value.to_string());
        self
    }

    /// Add a query parameter only when a value is present
    #[must_use]
    pub fn query_opt<V: ToString>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.query(name, v),
            None => self,
        }
    }

    /// Attach a JSON body
    #[must_use]
    pub fn json_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Override whether the response may be cached.
    ///
    /// Defaults to `true` for GET and `false` for every other method.
    #[must_use]
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = Some(cacheable);
        self
    }

    /// Validate the template and parameters and produce the descriptor
    ///
    /// # Errors
    /// Returns `GatewayError::InvalidRequest` if the template is malformed, a
    /// placeholder has no value, a parameter matches no placeholder, or a
    /// parameter value contains characters that are not allowed in a path segment
    pub fn build(self) -> Result<RequestDescriptor, GatewayError> {
        validate_template(&self.template)?;

        let mut seen: Vec<&str> = Vec::with_capacity(self.path_params.len());
        for (name, value) in &self.path_params {
            if seen.contains(&name.as_str()) {
                return Err(GatewayError::invalid_request(format!(
                    "Path parameter '{name}' supplied more than once"
                )));
            }
            seen.push(name);
            if value.is_empty() || !value.chars().all(is_unreserved) {
                return Err(GatewayError::invalid_request(format!(
                    "Invalid value for path parameter '{name}'"
                )));
            }
        }

        let path = render_path(&self.template, &self.path_params)?;
        let cacheable = self
            .cacheable
            .unwrap_or_else(|| self.method == Method::GET);
        let cache_key = RequestDescriptor::compute_cache_key(
            self.category,
            &self.method,
            &path,
            &self.query,
            self.body.as_ref(),
        );

        Ok(RequestDescriptor {
            category: self.category,
            method: self.method,
            template: self.template,
            path_params: self.path_params,
            query: self.query,
            body: self.body,
            cacheable,
            path,
            cache_key,
        })
    }
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

fn validate_template(template: &str) -> Result<(), GatewayError> {
    if !template.starts_with('/') {
        return Err(GatewayError::invalid_request(
            "Path template must start with '/'",
        ));
    }
    if template.split('/').any(|segment| segment == "..") {
        return Err(GatewayError::invalid_request(
            "Path template must not contain '..' segments",
        ));
    }
    let allowed = |c: char| is_unreserved(c) || matches!(c, '/' | '{' | '}' | ':' | '@' | ',' | '=' | '+');
    if let Some(bad) = template.chars().find(|c| !allowed(*c)) {
        return Err(GatewayError::invalid_request(format!(
            "Path template contains invalid character '{bad}'"
        )));
    }
    Ok(())
}

fn render_path(template: &str, params: &[(String, String)]) -> Result<String, GatewayError> {
    let mut rendered = String::with_capacity(template.len());
    let mut used = vec![false; params.len()];
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            GatewayError::invalid_request("Unterminated placeholder in path template")
        })?;
        let name = &after[..close];
        let idx = params
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| {
                GatewayError::invalid_request(format!("Missing path parameter '{name}'"))
            })?;
        used[idx] = true;
        rendered.push_str(&params[idx].1);
        rest = &after[close + 1..];
    }
    if rest.contains('}') {
        return Err(GatewayError::invalid_request(
            "Unbalanced '}' in path template",
        ));
    }
    rendered.push_str(rest);

    if let Some(idx) = used.iter().position(|u| !u) {
        return Err(GatewayError::invalid_request(format!(
            "Path parameter '{}' does not appear in the template",
            params[idx].0
        )));
    }

    Ok(rendered)
}
