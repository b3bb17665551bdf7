//! Collaborator seams: request parsing and validation

use dispatch_types::{Request, ValidationError};
use std::collections::{BTreeMap, BTreeSet};

/// Turns raw text into requests. Implemented by the host.
pub trait RequestParser {
    /// Parse one request, or `None` when the text holds none
    fn parse(&self, text: &str) -> Option<Request>;

    /// Parse an ordered chain of requests
    fn parse_chain(&self, text: &str) -> Vec<Request> {
        self.parse(text).into_iter().collect()
    }
}

/// Checks a request before anything is enqueued
pub trait RequestValidator: Send + Sync {
    fn validate(&self, request: &Request) -> Result<(), ValidationError>;
}

/// Accepts every request
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl RequestValidator for AllowAll {
    fn validate(&self, _request: &Request) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Validates requests against a table of known targets and their modes
#[derive(Clone, Debug, Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, BTreeSet<String>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a target and the modes it accepts
    pub fn with_capability<I, S>(mut self, target: impl Into<String>, modes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.register(target, modes);
        self
    }

    pub fn register<I, S>(&mut self, target: impl Into<String>, modes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .entry(target.into())
            .or_default()
            .extend(modes.into_iter().map(Into::into));
    }

    pub fn modes_for(&self, target: &str) -> Option<&BTreeSet<String>> {
        self.capabilities.get(target)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.capabilities.keys().map(String::as_str)
    }
}

impl RequestValidator for CapabilityRegistry {
    fn validate(&self, request: &Request) -> Result<(), ValidationError> {
        if request.target.trim().is_empty() {
            return Err(ValidationError::Rejected("request has no target".into()));
        }
        let modes = self
            .capabilities
            .get(&request.target)
            .ok_or_else(|| ValidationError::UnknownTarget(request.target.clone()))?;
        if !modes.contains(&request.mode) {
            return Err(ValidationError::InvalidMode {
                target: request.target.clone(),
                mode: request.mode.clone(),
            });
        }
        Ok(())
    }
}
