//! Server assembly: broker + auth + routes.

use axum::{middleware, response::IntoResponse, Router};
use devgrid::Broker;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::{
    auth::{AuthExtractor, HeaderAuth},
    routes::{create_routes, ServerState},
};

/// HTTP server fronting one broker instance.
pub struct BrokerServer {
    broker: Arc<Broker>,
    auth_extractor: Arc<dyn AuthExtractor>,
}

impl BrokerServer {
    pub fn builder(broker: Broker) -> BrokerServerBuilder {
        BrokerServerBuilder::new(broker)
    }

    fn display_server_info(&self, local_addr: &std::net::SocketAddr) {
        let card = self.broker.card().current();
        tracing::info!("devgrid broker listening at http://{local_addr}");
        tracing::info!(
            "agent card: http://{local_addr}/{}",
            devgrid_a2a::AGENT_CARD_PATH
        );
        tracing::info!(
            name = %card.name,
            version = %card.version,
            skills = card.skills.len(),
            "serving agent card"
        );
    }

    /// Warn about card fields that will confuse remote agents.
    fn validate_card(&self, local_addr: &std::net::SocketAddr) {
        let card = self.broker.card().current();
        let server_url = format!("http://{local_addr}");

        if card.url.is_empty() {
            tracing::warn!("agent card has no URL; remote agents cannot reach this broker");
        } else if card.url.trim_end_matches('/') != server_url.trim_end_matches('/') {
            tracing::info!(
                card_url = %card.url,
                server_url = %server_url,
                "agent card URL differs from bound address (fine behind a proxy)"
            );
        }
        if card.capabilities.streaming != Some(true) {
            tracing::info!("streaming is disabled; message/stream will be rejected");
        }
        if card.skills.len() <= 1 {
            tracing::info!("no device skills yet; register devices to extend the card");
        }
    }

    /// Convert into an axum router (auth middleware + CORS included).
    pub fn into_router(self) -> Router {
        let state = ServerState {
            handler: self.broker.handler(),
            card: self.broker.card(),
        };
        let auth_extractor = self.auth_extractor.clone();
        // Keep the broker (and its background loops) alive as long as
        // the router is.
        let broker = self.broker;

        create_routes(state)
            .layer(middleware::from_fn(
                move |req: axum::extract::Request, next: middleware::Next| {
                    let extractor = auth_extractor.clone();
                    let _keepalive = broker.clone();
                    async move {
                        let (mut parts, body) = req.into_parts();
                        match extractor.extract(&mut parts).await {
                            Ok(principal) => {
                                parts.extensions.insert(principal);
                                let req = axum::extract::Request::from_parts(parts, body);
                                Ok(next.run(req).await)
                            }
                            Err(e) => Err(e.into_response()),
                        }
                    }
                },
            ))
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve until the process exits.
    pub async fn serve(self, addr: impl tokio::net::ToSocketAddrs) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        self.display_server_info(&local_addr);
        self.validate_card(&local_addr);

        let app = self.into_router();
        axum::serve(listener, app).await
    }
}

pub struct BrokerServerBuilder {
    broker: Broker,
    auth_extractor: Option<Arc<dyn AuthExtractor>>,
}

impl BrokerServerBuilder {
    fn new(broker: Broker) -> Self {
        Self {
            broker,
            auth_extractor: None,
        }
    }

    /// Plug in the deployment's authentication scheme.
    pub fn with_auth<E: AuthExtractor>(mut self, extractor: E) -> Self {
        self.auth_extractor = Some(Arc::new(extractor));
        self
    }

    pub fn build(self) -> BrokerServer {
        let auth_extractor = self
            .auth_extractor
            .unwrap_or_else(|| Arc::new(HeaderAuth));
        BrokerServer {
            broker: Arc::new(self.broker),
            auth_extractor,
        }
    }
}
