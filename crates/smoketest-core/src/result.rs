//! Result tree
//!
//! A [`TestResult`] is either a leaf recorded by the step runner or a node
//! produced by [`aggregate`]. A node's `passed` flag is always the AND of its
//! direct children at the time it was built. Results are immutable once
//! constructed; the builder methods consume `self`.

use serde::{Deserialize, Serialize};

/// One node of the result tree.
///
/// Serialized field names follow the dashboard wire shape: `passed` goes out
/// as `result`, the error detail as `errorDescription`, children as
/// `results`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,

    name: String,

    #[serde(rename = "result")]
    passed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,

    #[serde(
        rename = "errorDescription",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    error_detail: Option<String>,

    #[serde(rename = "statusCode", default, skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,

    #[serde(rename = "results", default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<TestResult>,
}

impl TestResult {
    /// Create a passed leaf
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            key: None,
            name: name.into(),
            passed: true,
            error: None,
            error_detail: None,
            status_code: None,
            children: Vec::new(),
        }
    }

    /// Create a failed leaf
    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            key: None,
            name: name.into(),
            passed: false,
            error: Some(error.into()),
            error_detail: None,
            status_code: None,
            children: Vec::new(),
        }
    }

    /// Attach a key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attach an error description
    pub fn with_error_detail(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    /// Attach the status code of the exchange that produced this result
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_passed(&self) -> bool {
        self.passed
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Direct children, in execution order
    pub fn children(&self) -> &[TestResult] {
        &self.children
    }

    /// Whether this is a leaf (step) result
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Find a direct child by name
    pub fn child(&self, name: &str) -> Option<&TestResult> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Names of the direct children, in order
    pub fn child_names(&self) -> Vec<&str> {
        self.children.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Fold `results` into a parent node.
///
/// `passed` is the AND over all entries, so an empty list passes. The
/// children keep the order they were given in.
pub fn aggregate(
    key: impl Into<String>,
    name: impl Into<String>,
    results: Vec<TestResult>,
) -> TestResult {
    let passed = results.iter().all(|r| r.passed);
    TestResult {
        key: Some(key.into()),
        name: name.into(),
        passed,
        error: None,
        error_detail: None,
        status_code: None,
        children: results,
    }
}
