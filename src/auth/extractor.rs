// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for request identity.
//!
//! ```rust,ignore
//! async fn my_handler(ClientIdentity(client): ClientIdentity, cookies: Cookies) {
//!     // client is "203.0.113.7" or "unknown"
//! }
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header::COOKIE, request::Parts, HeaderMap},
};

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Best-effort client network identity.
///
/// First hop of `X-Forwarded-For`, else the transport peer address, else
/// `"unknown"`. Never rejects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(forwarded) = first_forwarded_hop(&parts.headers) {
            return Ok(ClientIdentity(forwarded));
        }

        let peer = peer_ip(parts).map(|ip| ip.to_string());
        Ok(ClientIdentity(
            peer.unwrap_or_else(|| UNKNOWN_CLIENT.to_string()),
        ))
    }
}

/// Transport peer address only; forwarding headers are not consulted.
///
/// `None` unless the server runs with `into_make_service_with_connect_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub Option<IpAddr>);

impl<S> FromRequestParts<S> for PeerAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(PeerAddr(peer_ip(parts)))
    }
}

fn peer_ip(parts: &Parts) -> Option<IpAddr> {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn first_forwarded_hop(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FORWARDED_FOR_HEADER)?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string)
}

/// Cookies sent with the request, by name.
#[derive(Debug, Clone, Default)]
pub struct Cookies(HashMap<String, String>);

impl Cookies {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cookies = HashMap::new();
        for header in headers.get_all(COOKIE) {
            let Ok(raw) = header.to_str() else {
                continue;
            };
            for pair in raw.split(';') {
                if let Some((name, value)) = pair.split_once('=') {
                    let name = name.trim();
                    if !name.is_empty() {
                        cookies
                            .entry(name.to_string())
                            .or_insert_with(|| value.trim().trim_matches('"').to_string());
                    }
                }
            }
        }
        Self(cookies)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

impl<S> FromRequestParts<S> for Cookies
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Cookies::from_headers(&parts.headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn identity(request: Request<()>) -> String {
        let (mut parts, _) = request.into_parts();
        let ClientIdentity(client) = ClientIdentity::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        client
    }

    #[tokio::test]
    async fn forwarded_for_first_hop_wins() {
        let request = Request::builder()
            .header("X-Forwarded-For", " 203.0.113.7 , 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(identity(request).await, "203.0.113.7");
    }

    #[tokio::test]
    async fn falls_back_to_peer_address() {
        let mut request = Request::builder().body(()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 4], 55123))));
        assert_eq!(identity(request).await, "198.51.100.4");
    }

    #[tokio::test]
    async fn peer_addr_ignores_forwarded_for() {
        let mut request = Request::builder()
            .header("X-Forwarded-For", "196.201.214.200")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 9], 40000))));
        let (mut parts, _) = request.into_parts();

        let PeerAddr(peer) = PeerAddr::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(peer, Some(IpAddr::from([203, 0, 113, 9])));
    }

    #[tokio::test]
    async fn unknown_without_any_source() {
        let request = Request::builder()
            .header("X-Forwarded-For", "")
            .body(())
            .unwrap();
        assert_eq!(identity(request).await, UNKNOWN_CLIENT);
    }

    #[tokio::test]
    async fn cookies_are_parsed_by_name() {
        let request = Request::builder()
            .header("Cookie", "theme=dark; csrf_token=abc.123.sig")
            .header("Cookie", "doc_access=\"tok\"; csrf_token=shadowed")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();
        let cookies = Cookies::from_request_parts(&mut parts, &()).await.unwrap();

        assert_eq!(cookies.get("csrf_token"), Some("abc.123.sig"));
        assert_eq!(cookies.get("doc_access"), Some("tok"));
        assert_eq!(cookies.get("missing"), None);
    }
}
