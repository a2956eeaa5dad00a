//! The HTTP server: listener ownership, connection handling and graceful
//! shutdown.
//!
//! The server owns a TCP listener (wrapped by the TLS manager's acceptor
//! when TLS is enabled) and feeds every request through the shared
//! [`RequestPipeline`]. Concurrency is capped by a semaphore sized from
//! `max_concurrent_requests`; request bodies are capped at
//! `max_payload_size_bytes`. On shutdown the listener stops accepting,
//! in-flight connections drain within `shutdown_timeout`, then anything
//! left is force-closed.

mod context;
mod pipeline;
mod response;

pub use context::{BoxHandler, Handler, HandlerFuture, RequestContext, Response};
pub use pipeline::RequestPipeline;
pub use response::{
    basic_auth_challenge, empty_response, error_response, json_response, text_response,
};

use {
    crate::config::HttpConfig,
    crate::lifecycle::{Component, Lifecycle},
    crate::tls::TlsManager,
    crate::{Error, Result},
    async_trait::async_trait,
    bytes::Bytes,
    http_body_util::{BodyExt, Full, Limited},
    hyper::body::Incoming,
    hyper::service::service_fn,
    hyper_util::rt::{TokioExecutor, TokioIo},
    parking_lot::{Mutex, RwLock},
    std::net::SocketAddr,
    std::sync::Arc,
    tokio::net::TcpListener,
    tokio::sync::Semaphore,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
};

/// The HTTP edge of the service.
pub struct HttpServer {
    lifecycle: Lifecycle,
    config: HttpConfig,
    tls: Option<Arc<TlsManager>>,
    pipeline: RwLock<Option<Arc<RequestPipeline>>>,
    serve_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl HttpServer {
    /// Creates a server. A TLS manager is attached when the listener
    /// should terminate TLS.
    pub fn new(config: HttpConfig, tls: Option<Arc<TlsManager>>) -> Self {
        Self {
            lifecycle: Lifecycle::new("http-server"),
            config,
            tls,
            pipeline: RwLock::new(None),
            serve_task: Mutex::new(None),
            local_addr: RwLock::new(None),
        }
    }

    /// Installs the request pipeline. Must happen before `start()`;
    /// replacing the pipeline on a running server is rejected.
    pub fn set_pipeline(&self, pipeline: Arc<RequestPipeline>) -> Result<()> {
        if self.lifecycle.is_running() {
            return Err(Error::already_running("http-server"));
        }
        *self.pipeline.write() = Some(pipeline);
        Ok(())
    }

    /// The bound address, available once running. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    async fn accept_loop(
        listener: TcpListener,
        pipeline: Arc<RequestPipeline>,
        config: HttpConfig,
        acceptor: Option<tokio_rustls::TlsAcceptor>,
        cancel: CancellationToken,
    ) {
        let graceful = hyper_util::server::graceful::GracefulShutdown::new();
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests as usize));
        let max_body = config.max_payload_size_bytes.as_u64() as usize;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::warn!(error = %err, "accept failed");
                            continue;
                        }
                    };

                    let pipeline = Arc::clone(&pipeline);
                    let semaphore = Arc::clone(&semaphore);
                    let acceptor = acceptor.clone();
                    let scope = cancel.clone();
                    let service = service_fn(move |request: hyper::Request<Incoming>| {
                        let pipeline = Arc::clone(&pipeline);
                        let semaphore = Arc::clone(&semaphore);
                        let scope = scope.clone();
                        async move {
                            let response =
                                handle_request(request, pipeline, semaphore, max_body, scope)
                                    .await;
                            Ok::<_, std::convert::Infallible>(response)
                        }
                    });

                    let watcher = graceful.watcher();
                    let handshake_timeout = config.read_timeout;
                    tokio::spawn(async move {
                        let builder =
                            hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
                        match acceptor {
                            Some(acceptor) => {
                                let handshake = tokio::time::timeout(
                                    handshake_timeout,
                                    acceptor.accept(stream),
                                );
                                match handshake.await {
                                    Ok(Ok(tls_stream)) => {
                                        let conn = builder
                                            .serve_connection(TokioIo::new(tls_stream), service)
                                            .into_owned();
                                        if let Err(err) = watcher.watch(conn).await {
                                            tracing::debug!(peer = %peer, error = %err, "connection closed with error");
                                        }
                                    }
                                    Ok(Err(err)) => {
                                        tracing::debug!(peer = %peer, error = %err, "TLS handshake failed");
                                    }
                                    Err(_) => {
                                        tracing::debug!(peer = %peer, "TLS handshake timed out");
                                    }
                                }
                            }
                            None => {
                                let conn = builder
                                    .serve_connection(TokioIo::new(stream), service)
                                    .into_owned();
                                if let Err(err) = watcher.watch(conn).await {
                                    tracing::debug!(peer = %peer, error = %err, "connection closed with error");
                                }
                            }
                        }
                    });
                }
            }
        }

        // Stop accepting, then drain in-flight connections.
        drop(listener);
        tokio::select! {
            _ = graceful.shutdown() => {
                tracing::info!("connections drained");
            }
            _ = tokio::time::sleep(config.shutdown_timeout) => {
                tracing::warn!(
                    timeout = ?config.shutdown_timeout,
                    "graceful shutdown timeout expired, forcing close"
                );
            }
        }
    }
}

async fn handle_request(
    request: hyper::Request<Incoming>,
    pipeline: Arc<RequestPipeline>,
    semaphore: Arc<Semaphore>,
    max_body: usize,
    scope: CancellationToken,
) -> hyper::Response<Full<Bytes>> {
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            // Semaphore closed only at shutdown.
            let err = Error::cancelled("server is shutting down");
            return into_hyper(error_response(&err, None));
        }
    };

    let (parts, body) = request.into_parts();
    let body = match Limited::new(body, max_body).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => {
            let response = response::json_response(
                http::StatusCode::PAYLOAD_TOO_LARGE,
                &serde_json::json!({
                    "error": "Payload Too Large",
                    "message": format!("request body exceeds {max_body} bytes"),
                }),
            );
            return into_hyper(response);
        }
    };

    let path = parts.uri.path().to_string();
    let response = pipeline
        .dispatch(parts.method, path, parts.headers, body, scope)
        .await;
    into_hyper(response)
}

fn into_hyper(response: Response) -> hyper::Response<Full<Bytes>> {
    let (parts, body) = response.into_parts();
    hyper::Response::from_parts(parts, Full::new(body))
}

#[async_trait]
impl Component for HttpServer {
    fn name(&self) -> &str {
        "http-server"
    }

    async fn start(&self) -> Result<()> {
        let guard = self.lifecycle.begin_start()?;

        let pipeline = self
            .pipeline
            .read()
            .clone()
            .ok_or_else(|| Error::internal("http-server started without a pipeline"))?;

        let acceptor = match &self.tls {
            Some(tls) if tls.is_running() => Some(tls.acceptor()?),
            Some(_) => {
                return Err(Error::tls(
                    "TLS manager must be running before the http-server starts",
                ));
            }
            None => None,
        };

        let bind_addr = self.config.full_bind_addr();
        let listener = TcpListener::bind(&bind_addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.write() = Some(local_addr);

        tracing::info!(
            addr = %local_addr,
            tls = acceptor.is_some(),
            "listening for connections"
        );

        let cancel = self.lifecycle.cancellation_token();
        let config = self.config.clone();
        let task = tokio::spawn(Self::accept_loop(
            listener, pipeline, config, acceptor, cancel,
        ));
        *self.serve_task.lock() = Some(task);

        guard.complete();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.begin_stop()?;
        let task = self.serve_task.lock().take();
        if let Some(task) = task {
            // The accept loop saw the cancelled scope and is draining; give
            // it the shutdown timeout plus slack before abandoning it.
            let drain_deadline = self.config.shutdown_timeout + std::time::Duration::from_secs(1);
            if tokio::time::timeout(drain_deadline, task).await.is_err() {
                tracing::error!("serve task failed to drain, abandoning");
            }
        }
        *self.local_addr.write() = None;
        tracing::info!("http server stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}
