//! Domain registration lookups over RDAP, the JSON successor to WHOIS.

use crate::{
    config::LookupConfig,
    error::AppError,
    lookup::{DomainInfoResolver, LookupResult},
    types::DomainInfo,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use publicsuffix::{List, Psl};
use reqwest::{header::ACCEPT, Client, StatusCode};
use serde::Deserialize;
use std::net::IpAddr;
use tracing::{debug, info};

/// Multi-label suffixes that matter for registrable-domain extraction. Hosts
/// under any other TLD fall through to the implicit `*` rule.
const BUILTIN_SUFFIXES: &str = "\
// ===BEGIN ICANN DOMAINS===
com
net
org
info
biz
io
co
uk
co.uk
org.uk
ac.uk
gov.uk
au
com.au
net.au
org.au
nz
co.nz
jp
co.jp
ne.jp
in
co.in
net.in
org.in
br
com.br
za
co.za
cn
com.cn
tr
com.tr
mx
com.mx
// ===END ICANN DOMAINS===
";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RdapDomain {
    ldh_name: Option<String>,
    unicode_name: Option<String>,
    #[serde(default)]
    events: Vec<RdapEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RdapEvent {
    event_action: String,
    event_date: Option<String>,
}

impl RdapDomain {
    fn event_date(&self, action: &str) -> Option<DateTime<Utc>> {
        self.events
            .iter()
            .filter(|event| event.event_action.eq_ignore_ascii_case(action))
            .filter_map(|event| event.event_date.as_deref())
            .filter_map(|date| DateTime::parse_from_rfc3339(date).ok())
            .map(|date| date.with_timezone(&Utc))
            .min()
    }

    fn into_domain_info(self) -> DomainInfo {
        DomainInfo {
            creation_date: self.event_date("registration"),
            expiration_date: self.event_date("expiration"),
            domain_name: self
                .ldh_name
                .clone()
                .or_else(|| self.unicode_name.clone())
                .filter(|name| !name.is_empty()),
        }
    }
}

pub struct RdapResolver {
    client: Client,
    base_url: String,
    suffixes: List,
}

impl RdapResolver {
    pub async fn new(config: &LookupConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("netra-engine/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let suffixes = match &config.public_suffix_list {
            Some(path) => {
                let content = tokio::fs::read_to_string(path).await?;
                info!("Loaded public suffix list from {}", path);
                parse_suffix_list(&content)?
            }
            None => parse_suffix_list(BUILTIN_SUFFIXES)?,
        };

        Ok(Self {
            client,
            base_url: config.rdap_base_url.trim_end_matches('/').to_string(),
            suffixes,
        })
    }

    /// Reduces a host to the name a registry holds a record for.
    pub fn registrable_domain(&self, host: &str) -> Option<String> {
        let host = host.trim_end_matches('.');
        if host.is_empty() || host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>().is_ok() {
            return None;
        }

        let ascii = idna::domain_to_ascii(host).ok()?;
        let domain = self.suffixes.domain(ascii.as_bytes())?;
        std::str::from_utf8(domain.as_bytes()).ok().map(str::to_string)
    }

    async fn fetch(&self, domain: &str) -> Result<RdapDomain, String> {
        let url = format!("{}/domain/{}", self.base_url, domain);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/rdap+json, application/json")
            .send()
            .await
            .map_err(|e| e.to_string())?;

        match response.status() {
            StatusCode::OK => response.json::<RdapDomain>().await.map_err(|e| e.to_string()),
            StatusCode::NOT_FOUND => Err(format!("no registration record for {}", domain)),
            status => Err(format!("RDAP server answered {} for {}", status, domain)),
        }
    }
}

fn parse_suffix_list(content: &str) -> Result<List, AppError> {
    content.parse::<List>().map_err(|e| {
        AppError::Config(config::ConfigError::Message(format!("invalid public suffix list: {}", e)))
    })
}

#[async_trait]
impl DomainInfoResolver for RdapResolver {
    async fn lookup(&self, host: &str) -> LookupResult<DomainInfo> {
        let Some(domain) = self.registrable_domain(host) else {
            return LookupResult::failure(format!("{:?} is not a registrable domain", host));
        };

        match self.fetch(&domain).await {
            Ok(record) => LookupResult::Success(record.into_domain_info()),
            Err(reason) => {
                debug!("RDAP lookup for {} failed: {}", domain, reason);
                LookupResult::Failure(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn resolver() -> RdapResolver {
        RdapResolver::new(&LookupConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_registrable_domain() {
        let resolver = resolver().await;
        assert_eq!(resolver.registrable_domain("www.example.com").as_deref(), Some("example.com"));
        assert_eq!(resolver.registrable_domain("a.b.example.co.uk").as_deref(), Some("example.co.uk"));
        assert_eq!(resolver.registrable_domain("login.example.xyz").as_deref(), Some("example.xyz"));
        assert_eq!(resolver.registrable_domain("192.168.1.1"), None);
        assert_eq!(resolver.registrable_domain(""), None);
    }

    #[tokio::test]
    async fn test_ip_host_fails_without_request() {
        let resolver = resolver().await;
        let result = resolver.lookup("10.0.0.1").await;
        assert!(matches!(result, LookupResult::Failure(_)));
    }

    #[test]
    fn test_rdap_record_mapping() {
        let body = r#"{
            "objectClassName": "domain",
            "ldhName": "EXAMPLE.COM",
            "events": [
                {"eventAction": "registration", "eventDate": "1995-08-14T04:00:00Z"},
                {"eventAction": "expiration", "eventDate": "2026-08-13T04:00:00Z"},
                {"eventAction": "last update of RDAP database", "eventDate": "2025-01-01T00:00:00Z"}
            ]
        }"#;
        let record: RdapDomain = serde_json::from_str(body).unwrap();
        let info = record.into_domain_info();

        assert_eq!(info.domain_name.as_deref(), Some("EXAMPLE.COM"));
        assert_eq!(info.creation_date, Some(Utc.with_ymd_and_hms(1995, 8, 14, 4, 0, 0).unwrap()));
        assert_eq!(info.expiration_date, Some(Utc.with_ymd_and_hms(2026, 8, 13, 4, 0, 0).unwrap()));
    }

    #[test]
    fn test_rdap_record_without_events() {
        let record: RdapDomain = serde_json::from_str(r#"{"ldhName": ""}"#).unwrap();
        let info = record.into_domain_info();
        assert_eq!(info, DomainInfo::default());
    }
}
