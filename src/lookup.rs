//! Collaborator interfaces for the network-backed heuristics.
//!
//! Resolvers never return errors to the extractor. Every failure, including a
//! timeout, arrives as `LookupResult::Failure` and each heuristic decides its
//! own fallback value.

use crate::types::DomainInfo;
use async_trait::async_trait;
use std::{future::Future, net::IpAddr, time::Duration};

#[derive(Debug, Clone, PartialEq)]
pub enum LookupResult<T> {
    Success(T),
    Failure(String),
}

impl<T> LookupResult<T> {
    pub fn failure(reason: impl Into<String>) -> Self {
        LookupResult::Failure(reason.into())
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for LookupResult<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => LookupResult::Success(value),
            Err(e) => LookupResult::Failure(e.to_string()),
        }
    }
}

/// WHOIS-style registration lookup.
#[async_trait]
pub trait DomainInfoResolver: Send + Sync {
    async fn lookup(&self, domain: &str) -> LookupResult<DomainInfo>;
}

/// Forward DNS lookup.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> LookupResult<IpAddr>;
}

/// Bounds a lookup so an unresponsive upstream degrades to a failure.
pub async fn with_timeout<T, F>(limit: Duration, what: &str, lookup: F) -> LookupResult<T>
where
    F: Future<Output = LookupResult<T>>,
{
    match tokio::time::timeout(limit, lookup).await {
        Ok(result) => result,
        Err(_) => LookupResult::Failure(format!("{} timed out after {}ms", what, limit.as_millis())),
    }
}
