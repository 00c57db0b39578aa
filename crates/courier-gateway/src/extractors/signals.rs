use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::{ACCEPT_ENCODING, ACCEPT_LANGUAGE, HOST, REFERER, USER_AGENT};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName};
use courier_devices::RequestSignals;
use std::convert::Infallible;
use std::net::SocketAddr;

/// Fingerprint inputs read from the request. Missing values are empty.
#[derive(Clone, Debug)]
pub struct ClientSignals(pub RequestSignals);

#[async_trait]
impl<S> FromRequestParts<S> for ClientSignals
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let headers = &parts.headers;

        Ok(ClientSignals(RequestSignals {
            client_address: client_address(headers, peer),
            user_agent: header_value(headers, &USER_AGENT),
            accept_language: header_value(headers, &ACCEPT_LANGUAGE),
            accept_encoding: header_value(headers, &ACCEPT_ENCODING),
            host: header_value(headers, &HOST),
            referrer: header_value(headers, &REFERER),
        }))
    }
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        return forwarded
            .split(',')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return real_ip.trim().to_string();
    }

    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

fn header_value(headers: &HeaderMap, name: &HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
