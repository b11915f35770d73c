//! Per-domain cookie jar.
//!
//! `Set-Cookie` headers are reduced to name/value pairs (attributes are
//! ignored) and merged into the jar of the response's host. Domains are
//! sharded by the map so unrelated hosts never contend.

use std::collections::BTreeMap;

use dashmap::DashMap;
use http::HeaderMap;
use http::header::SET_COOKIE;

#[derive(Debug, Default)]
pub struct CookieJar {
    domains: DashMap<String, BTreeMap<String, String>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge every `Set-Cookie` header into `domain`'s jar.
    pub fn store_from_headers(&self, domain: &str, headers: &HeaderMap) {
        let pairs: Vec<(String, String)> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();
        if pairs.is_empty() {
            return;
        }
        let mut jar = self.domains.entry(normalize(domain)).or_default();
        for (name, value) in pairs {
            jar.insert(name, value);
        }
    }

    pub fn set(&self, domain: &str, name: impl Into<String>, value: impl Into<String>) {
        self.domains
            .entry(normalize(domain))
            .or_default()
            .insert(name.into(), value.into());
    }

    pub fn get(&self, domain: &str, name: &str) -> Option<String> {
        self.domains
            .get(&normalize(domain))
            .and_then(|jar| jar.get(name).cloned())
    }

    /// `name=value; ...` for the domain, or `None` when its jar is empty.
    pub fn cookie_header(&self, domain: &str) -> Option<String> {
        let jar = self.domains.get(&normalize(domain))?;
        if jar.is_empty() {
            return None;
        }
        Some(format_pairs(jar.iter().map(|(k, v)| (k.as_str(), v.as_str()))))
    }

    pub fn clear(&self, domain: &str) {
        self.domains.remove(&normalize(domain));
    }
}

fn normalize(domain: &str) -> String {
    domain.trim_start_matches('.').to_ascii_lowercase()
}

/// First `name=value` segment of a `Set-Cookie` header value.
pub fn parse_set_cookie(raw: &str) -> Option<(String, String)> {
    let pair = raw.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().trim_matches('"').to_string()))
}

/// Pairs of a `Cookie` header value. Malformed segments are skipped.
pub fn parse_cookie_header(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|segment| {
            let (name, value) = segment.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Merge cookie header values by precedence: earlier sources win on name
/// conflicts. Callers pass `[explicit, account, default, jar]`.
pub fn merge_cookie_sources<'a, I>(sources: I) -> Option<String>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut merged: Vec<(String, String)> = Vec::new();
    for source in sources.into_iter().flatten() {
        for (name, value) in parse_cookie_header(source) {
            if !merged.iter().any(|(existing, _)| *existing == name) {
                merged.push((name, value));
            }
        }
    }
    if merged.is_empty() {
        return None;
    }
    Some(format_pairs(
        merged.iter().map(|(k, v)| (k.as_str(), v.as_str())),
    ))
}

fn format_pairs<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    pairs
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}
