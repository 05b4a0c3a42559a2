//! Built-in test kinds

use async_trait::async_trait;
use std::time::Duration;

use super::{property, RegistryError};
use crate::http::HttpRequest;
use crate::models::{ExecutionContext, TestAction, TestSpec, Verdict};

/// Passes immediately
pub struct NoopAction;

#[async_trait]
impl TestAction for NoopAction {
    async fn execute(&self, _ctx: &ExecutionContext) -> Verdict {
        Verdict::Pass
    }
}

/// Waits for a fixed time, then passes
pub struct SleepAction {
    duration: Duration,
}

impl SleepAction {
    pub fn from_spec(spec: &TestSpec) -> Result<Self, RegistryError> {
        let millis: u64 = property(spec, "millis")?.unwrap_or(100);
        Ok(Self {
            duration: Duration::from_millis(millis),
        })
    }
}

#[async_trait]
impl TestAction for SleepAction {
    async fn execute(&self, _ctx: &ExecutionContext) -> Verdict {
        tokio::time::sleep(self.duration).await;
        Verdict::Pass
    }
}

/// One HTTP request against the target
///
/// Properties: `method` (GET), `path` (/), `expect_status` (any 2xx/3xx when
/// absent), `body`, `headers`.
pub struct HttpAction {
    method: String,
    path: String,
    expect_status: Option<u16>,
    body: Option<String>,
    headers: std::collections::HashMap<String, String>,
}

impl HttpAction {
    pub fn from_spec(spec: &TestSpec) -> Result<Self, RegistryError> {
        let method: String = property(spec, "method")?.unwrap_or_else(|| "GET".to_string());
        let path: String = property(spec, "path")?.unwrap_or_else(|| "/".to_string());

        if !method.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(RegistryError::InvalidProperty {
                test: spec.name.clone(),
                property: "method".to_string(),
                reason: format!("'{method}' is not an HTTP method"),
            });
        }

        Ok(Self {
            method: method.to_uppercase(),
            path,
            expect_status: property(spec, "expect_status")?,
            body: property(spec, "body")?,
            headers: property(spec, "headers")?.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl TestAction for HttpAction {
    async fn execute(&self, ctx: &ExecutionContext) -> Verdict {
        let url = ctx.url(&self.path);
        let mut request = HttpRequest::new(self.method.clone(), url.clone()).headers(self.headers.clone());
        if let Some(body) = &self.body {
            request = request.body(body.clone());
        }

        match ctx.client.send(request).await {
            Ok(response) => {
                let accepted = match self.expect_status {
                    Some(expected) => response.status_code == expected,
                    None => response.is_success() || response.is_redirect(),
                };
                if accepted {
                    Verdict::Pass
                } else {
                    Verdict::fail(
                        "http_status",
                        format!("{} {} returned {}", self.method, url, response.status_code),
                    )
                }
            }
            Err(e) => Verdict::fail(e.kind(), e.to_string()),
        }
    }
}
