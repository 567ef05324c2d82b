use anyhow::Result;
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Client, Method, Request, Response, StatusCode,
};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::internal::data_types::{PeerIdentity, SignalKind, SignalingEnvelope};
use crate::internal::events::RendezvousEvent;
use crate::internal::rendezvous::Rendezvous;

// testing
// a Session requires a rendezvous service to exchange offers and answers. this one is provided
// for development purposes: every client runs a small web server, its identity is the address the
// server listens on, and envelopes are posted straight to the callee's server.
//
//   POST /call-user    body: offer envelope (JSON)
//   POST /answer-call  body: answer envelope (JSON)

pub struct HttpRendezvous {
    identity: PeerIdentity,
    client: Client<HttpConnector>,
}

impl HttpRendezvous {
    /// Binds the signaling server and spawns it. The actual listen address (useful when binding
    /// port 0) is the identity, and is the first event on the returned channel.
    pub async fn start(
        addr: &str,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<RendezvousEvent>)> {
        let addr = SocketAddr::from_str(addr)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let service_tx = tx.clone();
        let service = make_service_fn(move |_| {
            let tx = service_tx.clone();
            async move {
                Ok::<_, hyper::Error>(service_fn(move |req| remote_handler(req, tx.clone())))
            }
        });
        let server = hyper::Server::try_bind(&addr)?.serve(service);
        let identity = server.local_addr().to_string();
        tokio::spawn(async move {
            // Run this server for... forever!
            if let Err(e) = server.await {
                log::error!("server error: {}", e);
            }
        });

        tx.send(RendezvousEvent::IdentityAssigned(identity.clone()))?;
        Ok((
            Arc::new(Self {
                identity,
                client: Client::new(),
            }),
            rx,
        ))
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}

#[async_trait]
impl Rendezvous for HttpRendezvous {
    async fn send(&self, envelope: SignalingEnvelope) -> Result<()> {
        let route = match envelope.kind {
            SignalKind::Offer => "call-user",
            SignalKind::Answer => "answer-call",
        };
        let payload = serde_json::to_string(&envelope)?;
        let req = match Request::builder()
            .method(Method::POST)
            .uri(format!("http://{}/{}", &envelope.to, route))
            .header("content-type", "application/json; charset=utf-8")
            .body(Body::from(payload))
        {
            Ok(req) => req,
            Err(err) => {
                log::error!("failed to create request : {}", err);
                return Err(err.into());
            }
        };
        match self.client.request(req).await {
            Ok(response) if !response.status().is_success() => {
                log::warn!("{} rejected {}: {}", &envelope.to, route, response.status());
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => {
                log::error!("failed to send signaling parameters: {}", e);
                Err(e.into())
            }
        }
    }
}

async fn remote_handler(
    req: Request<Body>,
    tx: mpsc::UnboundedSender<RendezvousEvent>,
) -> Result<Response<Body>, hyper::Error> {
    let expected = match (req.method(), req.uri().path()) {
        (&Method::POST, "/call-user") => SignalKind::Offer,
        (&Method::POST, "/answer-call") => SignalKind::Answer,
        // Return the 404 Not Found for other routes.
        _ => return Ok(status(StatusCode::NOT_FOUND)),
    };

    let body = hyper::body::to_bytes(req.into_body()).await?;
    let envelope = match serde_json::from_slice::<SignalingEnvelope>(&body) {
        Ok(e) => e,
        Err(err) => {
            log::error!("deserialize error: {}", err);
            return Ok(status(StatusCode::BAD_REQUEST));
        }
    };
    if envelope.kind != expected {
        log::error!("{} posted to the {} route", envelope.kind, expected);
        return Ok(status(StatusCode::BAD_REQUEST));
    }

    if let Err(e) = tx.send(RendezvousEvent::Envelope(envelope)) {
        log::error!("failed to send signal: {}", e);
        return Ok(status(StatusCode::SERVICE_UNAVAILABLE));
    }
    Ok(status(StatusCode::OK))
}

fn status(code: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = code;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    async fn started() -> (Arc<HttpRendezvous>, mpsc::UnboundedReceiver<RendezvousEvent>) {
        let (client, mut rx) = HttpRendezvous::start("127.0.0.1:0").await.unwrap();
        match rx.recv().await {
            Some(RendezvousEvent::IdentityAssigned(id)) => assert_eq!(id, client.identity()),
            other => panic!("unexpected {:?}", other),
        }
        (client, rx)
    }

    #[tokio::test]
    async fn delivers_offer_over_http() {
        let (a, _a_rx) = started().await;
        let (b, mut b_rx) = started().await;

        let envelope = SignalingEnvelope {
            kind: SignalKind::Offer,
            from: a.identity().to_string(),
            to: b.identity().to_string(),
            payload: Bytes::from_static(b"{\"type\":\"offer\"}"),
            display_name: "alice".into(),
        };
        a.send(envelope.clone()).await.unwrap();

        match b_rx.recv().await {
            Some(RendezvousEvent::Envelope(received)) => assert_eq!(received, envelope),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn wrong_route_is_not_delivered() {
        let (b, mut b_rx) = started().await;
        let client = Client::new();
        let req = Request::builder()
            .method(Method::POST)
            .uri(format!("http://{}/answer-call", b.identity()))
            .body(Body::from(
                r#"{"kind":"offer","from":"x","to":"y","payload":""}"#,
            ))
            .unwrap();
        let response = client.request(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let req = Request::builder()
            .method(Method::GET)
            .uri(format!("http://{}/call-user", b.identity()))
            .body(Body::empty())
            .unwrap();
        let response = client.request(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(b_rx.try_recv().is_err());
    }
}
