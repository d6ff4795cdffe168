//! Local HTTP listener relaying requests through the rotator
//!
//! Lets tools that cannot embed the crate use the pool: every request received
//! on the local port is sent to the site through a random ready gateway.
//! Both origin-form (`GET /path`) and absolute-form (`GET https://site/path`)
//! request targets are accepted.

use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use http::header::HOST;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::error::{Result, RotatorError};
use crate::rotator::IpRotator;
use crate::transport::headers::is_hop_by_hop_header;

pub struct RotatorServer {
    config: ServerConfig,
    rotator: IpRotator,
}

impl RotatorServer {
    pub fn new(config: ServerConfig, rotator: IpRotator) -> Self {
        Self { config, rotator }
    }

    /// Bind the configured address and serve until `shutdown` flips to true
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| RotatorError::InvalidConfig(format!("Invalid listen address: {}", e)))?;

        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}, relaying to {}", addr, self.rotator.site());
        self.serve(listener, shutdown).await
    }

    /// Serve connections accepted on `listener`
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let rotator = self.rotator.clone();
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, rotator).await {
                                    debug!(client = %client_addr, "Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Listener shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_connection(stream: tokio::net::TcpStream, rotator: IpRotator) -> Result<()> {
        let io = TokioIo::new(stream);

        let service = service_fn(move |req: Request<Incoming>| {
            let rotator = rotator.clone();
            async move {
                let response = match Self::relay(&rotator, req).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("Relay failed: {}", e);
                        error_response(&e)
                    }
                };
                Ok::<_, Infallible>(response)
            }
        });

        http1::Builder::new()
            .serve_connection(io, service)
            .await
            .map_err(|e| RotatorError::Http(e.to_string()))?;

        Ok(())
    }

    async fn relay(rotator: &IpRotator, req: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        let (mut parts, body) = req.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| RotatorError::InvalidRequest(format!("Failed to read body: {}", e)))?
            .to_bytes();

        parts.uri = site_uri(rotator, &parts.uri)?;
        parts.headers.remove(HOST);
        let hop_by_hop: Vec<_> = parts
            .headers
            .keys()
            .filter(|name| is_hop_by_hop_header(name.as_str()))
            .cloned()
            .collect();
        for name in hop_by_hop {
            parts.headers.remove(&name);
        }

        let response = rotator.dispatch(Request::from_parts(parts, body)).await?;
        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Full::new(body)))
    }
}

/// Absolute URI on the site for a request received by the listener
fn site_uri(rotator: &IpRotator, uri: &Uri) -> Result<Uri> {
    if uri.scheme().is_some() {
        return Ok(uri.clone());
    }

    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("{}{}", rotator.site(), path_and_query)
        .parse()
        .map_err(|e| RotatorError::InvalidRequest(format!("Invalid request target: {}", e)))
}

fn error_response(err: &RotatorError) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(format!("Error: {}", err))));
    *response.status_mut() = err.status_code();
    response
}
