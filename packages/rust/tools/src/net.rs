//! HTTP client construction and outbound URL checks.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use longform_shared::{LongformError, Result};
use reqwest::Client;
use tracing::debug;
use url::{Host, Url};

/// User-Agent sent with every tool request.
pub const USER_AGENT: &str = concat!("longform/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client shared by the web tools.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| LongformError::Network(format!("failed to build HTTP client: {e}")))
}

/// Fetch `url` and return the body text. Non-2xx is an error.
pub(crate) async fn fetch_text(client: &Client, url: &Url) -> Result<String> {
    debug!(%url, "fetching");
    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| LongformError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(LongformError::Network(format!("{url}: HTTP {status}")));
    }

    response
        .text()
        .await
        .map_err(|e| LongformError::Network(format!("{url}: body read failed: {e}")))
}

/// Why an outbound URL was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    Scheme,
    NoHost,
    LocalName,
    Reserved(&'static str),
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::Scheme => f.write_str("only http and https are fetched"),
            Refusal::NoHost => f.write_str("no host"),
            Refusal::LocalName => f.write_str("local host name"),
            Refusal::Reserved(range) => write!(f, "{range} address"),
        }
    }
}

/// IPv4 ranges never fetched, as (network, prefix length, label).
const V4_RESERVED: &[(Ipv4Addr, u32, &str)] = &[
    (Ipv4Addr::new(0, 0, 0, 0), 8, "this-network"),
    (Ipv4Addr::new(10, 0, 0, 0), 8, "private"),
    (Ipv4Addr::new(100, 64, 0, 0), 10, "shared (CGNAT)"),
    (Ipv4Addr::new(127, 0, 0, 0), 8, "loopback"),
    (Ipv4Addr::new(169, 254, 0, 0), 16, "link-local"),
    (Ipv4Addr::new(172, 16, 0, 0), 12, "private"),
    (Ipv4Addr::new(192, 0, 0, 0), 24, "protocol assignment"),
    (Ipv4Addr::new(192, 168, 0, 0), 16, "private"),
    (Ipv4Addr::new(198, 18, 0, 0), 15, "benchmarking"),
    (Ipv4Addr::new(224, 0, 0, 0), 4, "multicast"),
    (Ipv4Addr::new(240, 0, 0, 0), 4, "reserved"),
];

const V6_RESERVED: &[(Ipv6Addr, u32, &str)] = &[
    (Ipv6Addr::UNSPECIFIED, 128, "unspecified"),
    (Ipv6Addr::LOCALHOST, 128, "loopback"),
    (Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7, "unique-local"),
    (Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10, "link-local"),
    (Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0), 8, "multicast"),
];

const LOCAL_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal"];

fn in_prefix(addr: u128, net: u128, prefix: u32, bits: u32) -> bool {
    let mask = u128::MAX.checked_shl(bits - prefix).unwrap_or(0) & (u128::MAX >> (128 - bits));
    addr & mask == net & mask
}

fn reserved_v4(ip: Ipv4Addr) -> Option<&'static str> {
    V4_RESERVED
        .iter()
        .find(|(net, prefix, _)| in_prefix(u32::from(ip).into(), u32::from(*net).into(), *prefix, 32))
        .map(|(_, _, label)| *label)
}

fn reserved_v6(ip: Ipv6Addr) -> Option<&'static str> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return reserved_v4(v4);
    }
    V6_RESERVED
        .iter()
        .find(|(net, prefix, _)| in_prefix(u128::from(ip), u128::from(*net), *prefix, 128))
        .map(|(_, _, label)| *label)
}

/// Reason `url` must not be fetched by a tool, or `None` for a public
/// http(s) URL.
pub fn refusal(url: &Url) -> Option<Refusal> {
    if !matches!(url.scheme(), "http" | "https") {
        return Some(Refusal::Scheme);
    }
    let Some(host) = url.host() else {
        return Some(Refusal::NoHost);
    };
    match host {
        Host::Ipv4(ip) => reserved_v4(ip).map(Refusal::Reserved),
        Host::Ipv6(ip) => reserved_v6(ip).map(Refusal::Reserved),
        Host::Domain(name) => {
            let name = name.trim_end_matches('.').to_ascii_lowercase();
            (name == "localhost" || LOCAL_SUFFIXES.iter().any(|s| name.ends_with(s)))
                .then_some(Refusal::LocalName)
        }
    }
}

/// Shorten `text` to at most `max_chars` characters on a char boundary,
/// marking the cut.
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}\n\n[... truncated]", &text[..cut]),
        None => text.to_string(),
    }
}
