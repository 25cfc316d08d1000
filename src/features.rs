use crate::{
    layout::{slot, FEATURE_LAYOUT},
    lookup::{with_timeout, DomainInfoResolver, HostResolver, LookupResult},
    types::{DomainInfo, FeatureVector},
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{net::IpAddr, sync::Arc, time::Duration};
use tracing::debug;
use url::Url;

static IP_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{1,3}\.){3}\d{1,3}$").unwrap());

const SHORTENERS: &[&str] = &["bit.ly", "tinyurl.com", "goo.gl", "ow.ly", "is.gd", "buff.ly"];

const SECURE_PREFIX: &str = "https://";
const SHORT_REGISTRATION_DAYS: i64 = 365;
const YOUNG_DOMAIN_DAYS: i64 = 180;

pub mod reasons {
    pub const IP_ADDRESS: &str = "URL contains an IP address.";
    pub const SHORTENER: &str = "URL uses a shortening service.";
    pub const AT_SYMBOL: &str = "URL contains '@' symbol.";
    pub const DOUBLE_SLASH: &str = "URL contains multiple '//'.";
    pub const HYPHEN: &str = "Domain contains hyphens.";
    pub const SUBDOMAINS: &str = "Domain has multiple subdomains.";
    pub const INSECURE: &str = "Connection is not secure (no HTTPS).";
    pub const SHORT_REGISTRATION: &str = "Domain registration length is less than a year.";
    pub const REGISTRATION_UNKNOWN: &str = "Unable to determine domain registration length.";
    pub const NON_STANDARD_PORT: &str = "Non-standard port used.";
    pub const ABNORMAL_URL: &str = "Abnormal URL detected.";
    pub const MAILTO: &str = "URL attempts to submit to email.";
    pub const YOUNG_DOMAIN: &str = "Domain age is less than 6 months.";
    pub const AGE_UNKNOWN: &str = "Unable to determine domain age.";
    pub const NO_DNS_RECORD: &str = "DNS record not found.";
}

/// Components of the scheme-normalized URL. Input the URL parser rejects is
/// split lexically, so a host that is present is always scored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedUrl {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
}

impl ParsedUrl {
    pub fn parse(url: &str) -> Self {
        match Url::parse(url) {
            Ok(parsed) => Self {
                scheme: parsed.scheme().to_string(),
                host: parsed.host_str().unwrap_or_default().to_string(),
                port: parsed.port(),
                path: parsed.path().to_string(),
            },
            Err(e) => {
                debug!("Could not parse {:?}: {}, splitting lexically", url, e);
                Self::lenient(url)
            }
        }
    }

    /// `scheme://[userinfo@]host[:port][/path][?query][#fragment]` taken apart
    /// by delimiters alone. A port that is not a valid `u16` is dropped.
    fn lenient(url: &str) -> Self {
        let (scheme, rest) = url.split_once("://").unwrap_or(("", url));
        let authority_end = rest.find(|c: char| matches!(c, '/' | '?' | '#')).unwrap_or(rest.len());
        let (authority, remainder) = rest.split_at(authority_end);
        let path_end = remainder.find(|c: char| matches!(c, '?' | '#')).unwrap_or(remainder.len());

        let host_port = authority.rsplit_once('@').map_or(authority, |(_, host_port)| host_port);
        // The port colon comes after the closing bracket of an IPv6 literal.
        let port_colon = match host_port.rfind(']') {
            Some(bracket) => host_port[bracket..].find(':').map(|i| bracket + i),
            None => host_port.rfind(':'),
        };
        let (host, port) = match port_colon {
            Some(i) => (&host_port[..i], host_port[i + 1..].parse().ok()),
            None => (host_port, None),
        };

        Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
            path: remainder[..path_end].to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFeatures {
    /// The URL after scheme normalization.
    pub url: String,
    pub vector: FeatureVector,
    pub reasons: Vec<String>,
}

/// Outcome of one heuristic: its slot value and the reason it contributes.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Check {
    value: f64,
    reason: Option<&'static str>,
}

impl Check {
    fn flag(fired: bool, reason: &'static str) -> Self {
        Self {
            value: if fired { 1.0 } else { 0.0 },
            reason: fired.then_some(reason),
        }
    }

    fn silent(fired: bool) -> Self {
        Self::measure(if fired { 1.0 } else { 0.0 })
    }

    fn measure(value: f64) -> Self {
        Self { value, reason: None }
    }
}

pub struct FeatureExtractor {
    domain_info: Arc<dyn DomainInfoResolver>,
    hosts: Arc<dyn HostResolver>,
    lookup_timeout: Duration,
}

impl FeatureExtractor {
    pub fn new(
        domain_info: Arc<dyn DomainInfoResolver>,
        hosts: Arc<dyn HostResolver>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            domain_info,
            hosts,
            lookup_timeout,
        }
    }

    pub async fn extract(&self, raw_url: &str) -> ExtractedFeatures {
        self.extract_at(raw_url, Utc::now()).await
    }

    /// Runs every heuristic against `raw_url`, measuring domain age and
    /// registration length relative to `now`.
    pub async fn extract_at(&self, raw_url: &str, now: DateTime<Utc>) -> ExtractedFeatures {
        let url = normalize_scheme(raw_url);
        let parsed = ParsedUrl::parse(&url);

        let (domain_info, resolved) = futures::join!(
            with_timeout(self.lookup_timeout, "domain info lookup", self.domain_info.lookup(&parsed.host)),
            with_timeout(self.lookup_timeout, "host resolution", self.hosts.resolve(&parsed.host)),
        );

        if let LookupResult::Failure(reason) = &domain_info {
            debug!("Domain info unavailable for {:?}: {}", parsed.host, reason);
            metrics::counter!("lookup_failures_total", "lookup" => "domain_info").increment(1);
        }
        if let LookupResult::Failure(reason) = &resolved {
            debug!("Host resolution failed for {:?}: {}", parsed.host, reason);
            metrics::counter!("lookup_failures_total", "lookup" => "dns").increment(1);
        }

        // Reasons are reported in slot order.
        let checks = [
            (slot::IP_ADDRESS, Check::flag(is_ip_literal(&parsed.host), reasons::IP_ADDRESS)),
            (slot::URL_LENGTH, Check::measure(url.chars().count() as f64)),
            (slot::SHORTENER, Check::flag(uses_shortener(&url), reasons::SHORTENER)),
            (slot::AT_SYMBOL, Check::flag(url.contains('@'), reasons::AT_SYMBOL)),
            (slot::DOUBLE_SLASH, Check::flag(has_double_slash(&url), reasons::DOUBLE_SLASH)),
            (slot::HYPHEN, Check::flag(parsed.host.contains('-'), reasons::HYPHEN)),
            (slot::SUBDOMAIN, Check::flag(parsed.host.split('.').count() > 2, reasons::SUBDOMAINS)),
            (slot::INSECURE, Check::flag(!url.starts_with("https"), reasons::INSECURE)),
            (slot::REGISTRATION_LENGTH, registration_length(&domain_info, now)),
            (slot::FAVICON, Check::measure(0.0)),
            (slot::PORT, Check::flag(is_non_standard_port(parsed.port), reasons::NON_STANDARD_PORT)),
            (slot::HTTPS_TOKEN, Check::silent(url.contains("https"))),
            (slot::ABNORMAL_URL, abnormal_url(&parsed.host, &resolved)),
            (slot::DOUBLE_SLASH_RECHECK, Check::silent(has_double_slash(&url))),
            (slot::MAILTO, Check::flag(url.contains("mailto:"), reasons::MAILTO)),
            (slot::DOMAIN_AGE, domain_age(&domain_info, now)),
            (slot::DNS_RECORD, dns_record(&domain_info)),
        ];
        debug_assert_eq!(checks.len(), FEATURE_LAYOUT.len());
        debug_assert!(checks.iter().enumerate().all(|(i, (index, _))| i == *index));

        let values: Vec<(usize, f64)> = checks.iter().map(|(index, check)| (*index, check.value)).collect();
        let reasons: Vec<String> = checks
            .iter()
            .filter_map(|(_, check)| check.reason)
            .map(str::to_string)
            .collect();

        let vector = FeatureVector::from_slots(&values);
        debug!(
            "Extracted features for {}: ip={} length={} reasons={}",
            url,
            vector.get(slot::IP_ADDRESS),
            vector.get(slot::URL_LENGTH),
            reasons.len()
        );

        ExtractedFeatures { url, vector, reasons }
    }
}

/// Prepends the secure scheme unless the input already names http or https.
pub fn normalize_scheme(raw_url: &str) -> String {
    if raw_url.starts_with("http://") || raw_url.starts_with("https://") {
        raw_url.to_string()
    } else {
        format!("{}{}", SECURE_PREFIX, raw_url)
    }
}

fn is_ip_literal(host: &str) -> bool {
    IP_LITERAL.is_match(host)
}

fn uses_shortener(url: &str) -> bool {
    SHORTENERS.iter().any(|shortener| url.contains(shortener))
}

fn has_double_slash(url: &str) -> bool {
    url.matches("//").count() > 1
}

fn is_non_standard_port(port: Option<u16>) -> bool {
    matches!(port, Some(p) if p != 80 && p != 443)
}

fn registration_length(info: &LookupResult<DomainInfo>, now: DateTime<Utc>) -> Check {
    match info {
        LookupResult::Success(DomainInfo {
            expiration_date: Some(expires),
            ..
        }) => {
            let days_left = (*expires - now).num_days();
            Check::flag(days_left <= SHORT_REGISTRATION_DAYS, reasons::SHORT_REGISTRATION)
        }
        _ => Check::flag(true, reasons::REGISTRATION_UNKNOWN),
    }
}

/// The resolved address is compared to the host text, so any named host
/// that resolves counts as abnormal.
fn abnormal_url(host: &str, resolved: &LookupResult<IpAddr>) -> Check {
    match resolved {
        LookupResult::Success(ip) => Check::flag(ip.to_string() != host, reasons::ABNORMAL_URL),
        LookupResult::Failure(_) => Check::flag(true, reasons::ABNORMAL_URL),
    }
}

fn domain_age(info: &LookupResult<DomainInfo>, now: DateTime<Utc>) -> Check {
    match info {
        LookupResult::Success(DomainInfo {
            creation_date: Some(created),
            ..
        }) => {
            let age_days = (now - *created).num_days();
            Check::flag(age_days < YOUNG_DOMAIN_DAYS, reasons::YOUNG_DOMAIN)
        }
        _ => Check::flag(true, reasons::AGE_UNKNOWN),
    }
}

fn dns_record(info: &LookupResult<DomainInfo>) -> Check {
    let present = match info {
        LookupResult::Success(info) => info.domain_name.as_deref().is_some_and(|name| !name.is_empty()),
        LookupResult::Failure(_) => false,
    };
    Check::flag(!present, reasons::NO_DNS_RECORD)
}
