//! HTTP digest authentication (RFC 2617, MD5) for 401 challenges.

use std::fmt::Write;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::{SipClientError, SipClientResult};

/// Parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: String,
    /// Set when the server offered `qop=auth`.
    pub qop_auth: bool,
    pub stale: bool,
}

impl DigestChallenge {
    pub fn parse(header: &str) -> SipClientResult<Self> {
        let header = header.trim();
        let (scheme, params) = header
            .split_once(char::is_whitespace)
            .ok_or_else(|| SipClientError::challenge("missing auth params"))?;
        if !scheme.eq_ignore_ascii_case("digest") {
            return Err(SipClientError::challenge(format!("unsupported scheme {}", scheme)));
        }

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = "MD5".to_string();
        let mut qop_auth = false;
        let mut stale = false;

        for (key, value) in split_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = value,
                "qop" => {
                    qop_auth = value
                        .split(',')
                        .any(|q| q.trim().eq_ignore_ascii_case("auth"))
                }
                "stale" => stale = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        if !algorithm.eq_ignore_ascii_case("MD5") {
            return Err(SipClientError::challenge(format!("unsupported algorithm {}", algorithm)));
        }

        Ok(Self {
            realm: realm.ok_or_else(|| SipClientError::challenge("missing realm"))?,
            nonce: nonce.ok_or_else(|| SipClientError::challenge("missing nonce"))?,
            opaque,
            algorithm,
            qop_auth,
            stale,
        })
    }
}

/// Split `k1="v1", k2=v2` honouring commas inside quotes.
fn split_params(params: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in params.chars().chain(std::iter::once(',')) {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ',' if !quoted => {
                if let Some((k, v)) = current.split_once('=') {
                    out.push((k.trim().to_string(), v.trim().trim_matches('"').to_string()));
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    out
}

/// Username and password used to answer challenges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The `response` digest for one request.
    ///
    /// `nc` and `cnonce` only take part when the challenge offered `qop=auth`.
    pub fn digest_response(
        &self,
        challenge: &DigestChallenge,
        method: &str,
        uri: &str,
        nc: u32,
        cnonce: &str,
    ) -> String {
        let ha1 = md5_hex(&format!("{}:{}:{}", self.username, challenge.realm, self.password));
        let ha2 = md5_hex(&format!("{}:{}", method, uri));
        if challenge.qop_auth {
            md5_hex(&format!(
                "{}:{}:{:08x}:{}:auth:{}",
                ha1, challenge.nonce, nc, cnonce, ha2
            ))
        } else {
            md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2))
        }
    }

    /// Full `Authorization` header value.
    pub fn authorize(
        &self,
        challenge: &DigestChallenge,
        method: &str,
        uri: &str,
        nc: u32,
        cnonce: &str,
    ) -> String {
        let response = self.digest_response(challenge, method, uri, nc, cnonce);
        let mut value = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
            self.username, challenge.realm, challenge.nonce, uri, response, challenge.algorithm
        );
        if challenge.qop_auth {
            let _ = write!(value, ", qop=auth, nc={:08x}, cnonce=\"{}\"", nc, cnonce);
        }
        if let Some(opaque) = &challenge.opaque {
            let _ = write!(value, ", opaque=\"{}\"", opaque);
        }
        value
    }
}

fn md5_hex(input: &str) -> String {
    let digest = Md5::digest(input.as_bytes());
    let mut out = String::with_capacity(32);
    for b in digest.iter() {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
