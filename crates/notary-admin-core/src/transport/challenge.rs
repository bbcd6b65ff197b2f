//! `WWW-Authenticate` challenge parsing and bookkeeping.
//!
//! Only `401` responses register challenges. Challenges are remembered per
//! endpoint (scheme, host and port) so that later requests to the same
//! server are authorised before they are sent.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, WWW_AUTHENTICATE};
use reqwest::{Response, StatusCode, Url};
use tracing::debug;

/// One authentication challenge, for example
/// `Bearer realm="https://auth.example.com/token",service="notary"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Lowercased scheme such as `bearer` or `basic`.
    pub scheme: String,
    /// Parameters keyed by lowercased name.
    pub parameters: HashMap<String, String>,
}

/// Parses every `WWW-Authenticate` header in `headers`.
pub fn parse_challenges(headers: &HeaderMap) -> Vec<Challenge> {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(parse_challenge)
        .collect()
}

/// Parses a single header value: a scheme token followed by comma separated
/// `name=value` pairs whose values may be quoted.
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim_start();
    let scheme_end = header
        .find(|c: char| c.is_whitespace())
        .unwrap_or(header.len());
    let scheme = &header[..scheme_end];
    if scheme.is_empty() || scheme.contains(&['=', ',', '"'][..]) {
        return None;
    }

    let mut parameters = HashMap::new();
    let mut rest = header[scheme_end..].trim_start();
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else {
            break;
        };
        let name = rest[..eq].trim().to_ascii_lowercase();
        rest = rest[eq + 1..].trim_start();
        let (value, remaining) = if let Some(quoted) = rest.strip_prefix('"') {
            parse_quoted(quoted)?
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            (rest[..end].trim().to_string(), &rest[end..])
        };
        if !name.is_empty() {
            parameters.insert(name, value);
        }
        rest = remaining.trim_start();
        rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
    }

    Some(Challenge {
        scheme: scheme.to_ascii_lowercase(),
        parameters,
    })
}

/// Reads a quoted string body (after the opening quote), honouring
/// backslash escapes. Returns the value and the input after the closing quote.
fn parse_quoted(input: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut escaped = false;
    for (index, c) in input.char_indices() {
        match c {
            _ if escaped => {
                value.push(c);
                escaped = false;
            }
            '\\' => escaped = true,
            '"' => return Some((value, &input[index + 1..])),
            _ => value.push(c),
        }
    }
    None
}

/// Challenges received from each endpoint.
#[derive(Debug, Clone, Default)]
pub struct ChallengeManager {
    challenges: HashMap<String, Vec<Challenge>>,
}

impl ChallengeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the challenges of an unauthorised response against the
    /// endpoint that produced it. Other responses are ignored.
    pub fn add_response(&mut self, response: &Response) {
        if response.status() != StatusCode::UNAUTHORIZED {
            return;
        }
        self.add_challenges(response.url(), parse_challenges(response.headers()));
    }

    pub fn add_challenges(&mut self, url: &Url, challenges: Vec<Challenge>) {
        let Some(key) = endpoint_key(url) else {
            return;
        };
        debug!(endpoint = %key, challenges = challenges.len(), "registered auth challenges");
        self.challenges.insert(key, challenges);
    }

    /// Challenges registered for the endpoint of `url`.
    pub fn challenges_for(&self, url: &Url) -> &[Challenge] {
        endpoint_key(url)
            .and_then(|key| self.challenges.get(&key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn endpoint_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    let port = url.port_or_known_default()?;
    Some(format!("{}://{host}:{port}", url.scheme()))
}
