//! The TCP server.
//!
//! One accepted connection carries exactly one request and one response.
//! Every connection gets its own task; the handler itself runs in yet
//! another task so a panicking handler surfaces as a regular framework
//! error instead of tearing the connection task down silently.

use std::net::SocketAddr;
use std::sync::Arc;

use protocol::{ErrorSource, Response};
use tokio::net::{TcpListener, TcpStream};

use crate::config::ServerConfig;
use crate::framework::Framework;
use crate::wire;

/// Runs the accept loop until Ctrl-C. Also owns the reaper task that
/// collects idle sessions.
pub async fn run(
    listener: TcpListener,
    config: ServerConfig,
    framework: Arc<Framework>,
) -> std::io::Result<()> {
    let config = Arc::new(config);

    let reaper = {
        let framework = framework.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(framework.reap_interval());
            interval.tick().await; // the first tick fires immediately
            loop {
                interval.tick().await;
                framework.reap_idle_sessions().await;
            }
        })
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target: "server", "shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            framework.clone(),
                            config.clone(),
                        ));
                    }
                    Err(err) => {
                        tracing::error!(target: "server", %err, "failed to accept connection");
                    }
                }
            }
        }
    }

    reaper.abort();
    Ok(())
}

/// Reads one request, lets the framework handle it, writes the response and
/// closes the connection. Transport failures that leave nobody to answer
/// are logged and otherwise silent.
async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    framework: Arc<Framework>,
    config: Arc<ServerConfig>,
) {
    tracing::debug!(target: "server", %addr, "accepted connection");
    let connection_timeout = config.connection_timeout();

    let read = tokio::time::timeout(
        connection_timeout,
        wire::read_request(&mut stream, config.buffer_size, config.request_size_max),
    )
    .await;

    let request = match read {
        Ok(Ok(request)) => request,
        Ok(Err(err)) => {
            match err.response() {
                Some(response) => {
                    tracing::error!(target: "server", %addr, %err, "rejecting request");
                    send_response(&mut stream, addr, &response, &config).await;
                }
                None => tracing::debug!(target: "server", %addr, %err, "client gone"),
            }
            return;
        }
        Err(_) => {
            tracing::error!(target: "server", %addr, "connection timed out while reading");
            let response =
                Response::error_text(ErrorSource::Server, "connection timed out on server");
            send_response(&mut stream, addr, &response, &config).await;
            return;
        }
    };

    // The handler runs in its own task: a panic inside a handler must not
    // take the response path with it.
    let handled = tokio::spawn(async move { framework.handle(request).await }).await;
    let response = handled.unwrap_or_else(|err| {
        tracing::error!(target: "framework", ?err, "request handler failed");
        Response::error_text(ErrorSource::Framework, "internal error")
    });

    send_response(&mut stream, addr, &response, &config).await;
    tracing::debug!(target: "server", %addr, "closing connection");
}

async fn send_response(
    stream: &mut TcpStream,
    addr: SocketAddr,
    response: &Response,
    config: &ServerConfig,
) {
    let write = tokio::time::timeout(
        config.connection_timeout(),
        wire::write_response(stream, response),
    )
    .await;
    match write {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::error!(target: "server", %addr, %err, "failed to write response");
        }
        Err(_) => {
            tracing::error!(target: "server", %addr, "connection timed out while writing");
        }
    }
}
