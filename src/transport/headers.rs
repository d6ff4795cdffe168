//! Header rewriting on the way to and from a gateway

use std::net::Ipv4Addr;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use rand::Rng;

/// Request header the gateway relays as the origin's `X-Forwarded-For`
pub const RELAY_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-my-x-forwarded-for");

pub const FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Prefix API Gateway puts on origin headers that clash with its own
const REMAPPED_PREFIX: &str = "x-amzn-remapped-";

/// Headers added by the gateway and its CDN hop
const GATEWAY_HEADERS: &[&str] = &[
    "x-amzn-requestid",
    "x-amz-apigw-id",
    "x-amz-cf-id",
    "x-amz-cf-pop",
    "x-cache",
    "via",
];

/// Four independent random octets
pub fn random_ipv4<R: Rng + ?Sized>(rng: &mut R) -> Ipv4Addr {
    Ipv4Addr::new(rng.gen(), rng.gen(), rng.gen(), rng.gen())
}

/// Decide the forwarded-for value the origin will see.
///
/// An explicit relay header wins, then the caller's own `X-Forwarded-For`,
/// then a random address.
pub fn apply_forwarded_for<R: Rng + ?Sized>(headers: &mut HeaderMap, rng: &mut R) {
    if headers.contains_key(&RELAY_FORWARDED_FOR) {
        return;
    }

    let value = match headers.get(&FORWARDED_FOR) {
        Some(explicit) => explicit.clone(),
        None => HeaderValue::from_str(&random_ipv4(rng).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("127.0.0.1")),
    };
    headers.insert(RELAY_FORWARDED_FOR, value);
}

pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Strip gateway-hop headers and restore origin headers the gateway remapped
pub fn translate_response_headers(headers: HeaderMap) -> HeaderMap {
    let mut translated = HeaderMap::with_capacity(headers.len());
    let mut restored = Vec::new();

    let mut current: Option<HeaderName> = None;
    for (name, value) in headers {
        // `None` repeats the previous name for multi-valued headers
        let name = match name {
            Some(name) => {
                current = Some(name.clone());
                name
            }
            None => match &current {
                Some(name) => name.clone(),
                None => continue,
            },
        };

        let lower = name.as_str();
        if let Some(original) = lower.strip_prefix(REMAPPED_PREFIX) {
            if let Ok(original) = HeaderName::from_bytes(original.as_bytes()) {
                if !is_hop_by_hop_header(original.as_str()) {
                    restored.push((original, value));
                }
            }
            continue;
        }
        if GATEWAY_HEADERS.contains(&lower) || is_hop_by_hop_header(lower) {
            continue;
        }
        translated.append(name, value);
    }

    // The remapped value is the origin's; it replaces whatever the gateway set
    let mut replaced = Vec::new();
    for (name, value) in restored {
        if !replaced.contains(&name) {
            translated.remove(&name);
            replaced.push(name.clone());
        }
        translated.append(name, value);
    }

    translated
}
