use crate::{
    configuration::{ServerConfig, StubOption},
    error::Error,
    interactions::{ContentType, InteractionData, Interactions, RequestCaptureFn},
};
use hyper::{
    body,
    header::CONTENT_TYPE,
    service::{make_service_fn, service_fn},
    Body, HeaderMap, Request, Response, Server, StatusCode,
};
use quick_xml::{
    events::{BytesEnd, BytesStart, BytesText, Event},
    Writer,
};
use serde::Serialize;
use serde_json::Value;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
};
use tokio::{runtime::Runtime, sync::oneshot};
use tracing::{error, info, warn};

const NO_INTERACTION_MESSAGE: &str =
    "[MOCK WEB SERVER ERROR] does not have (any more) mock interactions for path/method";

/// HTTP server that answers every request from its [`Interactions`] registry.
///
/// The server runs on its own thread with its own tokio runtime and listens
/// on an OS-assigned localhost port, so it can be driven from ordinary
/// synchronous test code. Requests with no matching interaction left get a
/// 501 response carrying the offending method and path.
#[derive(Debug)]
pub struct StubServer {
    interactions: Arc<Interactions>,
    address: SocketAddr,
    config: ServerConfig,
    handle: Mutex<Option<ServerHandle>>,
}

#[derive(Debug)]
struct ServerHandle {
    shutdown_tx: oneshot::Sender<()>,
    done_rx: mpsc::Receiver<()>,
    join_handle: JoinHandle<()>,
}

impl StubServer {
    /// Starts a stub server with the default timing configuration.
    pub fn start() -> Result<Self, Error> {
        Self::start_with_config(ServerConfig::default())
    }

    pub fn start_with_config(config: ServerConfig) -> Result<Self, Error> {
        let interactions = Arc::new(Interactions::new());
        let (startup_tx, startup_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let handler_interactions = interactions.clone();
        let join_handle = thread::spawn(move || {
            let runtime = match Runtime::new() {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = startup_tx.send(Err(Error::IoError(e)));
                    return;
                }
            };

            runtime.block_on(async move {
                let addr = SocketAddr::from(([127, 0, 0, 1], 0));
                let builder = match Server::try_bind(&addr) {
                    Ok(builder) => builder,
                    Err(e) => {
                        let _ = startup_tx.send(Err(Error::HyperError(e)));
                        return;
                    }
                };

                let make_service = make_service_fn(move |_| {
                    let interactions = handler_interactions.clone();
                    async move {
                        Ok::<_, Infallible>(service_fn(move |request| {
                            handle_request(interactions.clone(), request)
                        }))
                    }
                });

                let server = builder.serve(make_service);
                let address = server.local_addr();
                let graceful = server.with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                });

                let _ = startup_tx.send(Ok(address));
                if let Err(e) = graceful.await {
                    error!(error = %e, "stub server error");
                }
                let _ = done_tx.send(());
            });
        });

        let address = match startup_rx.recv_timeout(config.startup_wait_timeout) {
            Ok(Ok(address)) => address,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::StartupTimeout),
        };

        info!(%address, "started stub server");

        Ok(Self {
            interactions,
            address,
            config,
            handle: Mutex::new(Some(ServerHandle {
                shutdown_tx,
                done_rx,
                join_handle,
            })),
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    /// The registry backing this server, for direct inspection in tests.
    pub fn interactions(&self) -> &Interactions {
        &self.interactions
    }

    /// Registers a stubbed response; see [`Interactions::add`].
    pub fn add_interaction(
        &self,
        method: &str,
        path: &str,
        response_status: u16,
        response_body: Option<Value>,
        response_content_type: ContentType,
        capture_fn: Option<RequestCaptureFn>,
        options: &[StubOption],
    ) -> Result<(), Error> {
        self.interactions.add(
            method,
            path,
            response_status,
            response_body,
            response_content_type,
            capture_fn,
            options,
        )
    }

    /// Discards every registered interaction.
    pub fn reset(&self) {
        self.interactions.reset();
    }

    /// Signals graceful shutdown and waits for in-flight requests to finish,
    /// up to the configured shutdown wait.
    pub fn shutdown(self) -> Result<(), Error> {
        self.shutdown_impl()
    }

    fn shutdown_impl(&self) -> Result<(), Error> {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let handle = match handle {
            Some(handle) => handle,
            None => return Ok(()),
        };

        info!(address = %self.address, "shutting down stub server");
        let _ = handle.shutdown_tx.send(());

        if handle
            .done_rx
            .recv_timeout(self.config.shutdown_wait_timeout)
            .is_err()
        {
            warn!("timed out waiting for stub server to shut down");
            return Err(Error::ShutdownTimeout);
        }

        let _ = handle.join_handle.join();
        Ok(())
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        // Tests usually let the server fall out of scope instead of calling
        // shutdown explicitly.
        let _ = self.shutdown_impl();
    }
}

#[derive(Debug, Serialize)]
struct NoInteractionResponse {
    message: &'static str,
    path: String,
    method: String,
}

async fn handle_request(
    interactions: Arc<Interactions>,
    mut request: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let headers = request.headers().clone();
    let body_bytes = body::to_bytes(request.body_mut()).await.unwrap_or_default();

    info!(%method, %path, body_len = body_bytes.len(), "request to stub server");

    match interactions.next_interaction(&method, &path) {
        Some(interaction) => match respond(interaction, &body_bytes, &headers).await {
            Ok(response) => Ok(response),
            Err(e) => {
                error!(error = %e, "failed to render stub response");
                Ok(status_only(StatusCode::INTERNAL_SERVER_ERROR))
            }
        },
        None => {
            warn!(%method, %path, "responding with 501 since no interactions were found");
            Ok(no_interaction_response(method, path))
        }
    }
}

async fn respond(
    interaction: InteractionData,
    body: &[u8],
    headers: &HeaderMap,
) -> Result<Response<Body>, Error> {
    if !interaction.delay_response.is_zero() {
        info!(delay = ?interaction.delay_response, "delaying response");
        tokio::time::sleep(interaction.delay_response).await;
    }

    // Capture (and the callback) must complete before any response bytes are
    // written.
    interaction.capture(body, headers);

    // Out-of-range codes are rejected at registration, so this cannot fail.
    let status = StatusCode::from_u16(interaction.response_status)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    match &interaction.response_body {
        Some(response_body) => {
            let (content_type, rendered) =
                render_body(response_body, interaction.response_content_type)?;
            info!(%status, body = %rendered, "responding with body");
            Ok(Response::builder()
                .status(status)
                .header(CONTENT_TYPE, content_type)
                .body(Body::from(rendered))?)
        }
        None => {
            info!(%status, "responding with status code only");
            Ok(status_only(status))
        }
    }
}

fn render_body(body: &Value, content_type: ContentType) -> Result<(&'static str, String), Error> {
    match content_type {
        ContentType::Json => Ok((
            "application/json; charset=utf-8",
            serde_json::to_string(body)?,
        )),
        ContentType::Xml => Ok(("application/xml; charset=utf-8", render_xml(body)?)),
    }
}

/// Renders a JSON payload as XML: object keys become elements, arrays repeat
/// the enclosing element, and the whole document is wrapped in `<response>`.
fn render_xml(body: &Value) -> Result<String, Error> {
    let mut writer = Writer::new(Vec::new());
    write_xml_value(&mut writer, "response", body)?;
    Ok(String::from_utf8_lossy(&writer.into_inner()).into())
}

fn write_xml_value(writer: &mut Writer<Vec<u8>>, tag: &str, value: &Value) -> Result<(), Error> {
    match value {
        Value::Object(fields) => {
            writer.write_event(Event::Start(BytesStart::borrowed(tag.as_bytes(), tag.len())))?;
            for (key, field) in fields {
                write_xml_value(writer, key, field)?;
            }
            writer.write_event(Event::End(BytesEnd::borrowed(tag.as_bytes())))?;
        }
        Value::Array(items) => {
            for item in items {
                write_xml_value(writer, tag, item)?;
            }
        }
        Value::Null => {
            writer.write_event(Event::Empty(BytesStart::borrowed(tag.as_bytes(), tag.len())))?;
        }
        scalar => {
            let text = match scalar {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            writer.write_event(Event::Start(BytesStart::borrowed(tag.as_bytes(), tag.len())))?;
            writer.write_event(Event::Text(BytesText::from_plain_str(&text)))?;
            writer.write_event(Event::End(BytesEnd::borrowed(tag.as_bytes())))?;
        }
    }

    Ok(())
}

fn status_only(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

fn no_interaction_response(method: String, path: String) -> Response<Body> {
    let error_body = NoInteractionResponse {
        message: NO_INTERACTION_MESSAGE,
        path,
        method,
    };
    let body = serde_json::to_string(&error_body).unwrap_or_default();

    Response::builder()
        .status(StatusCode::NOT_IMPLEMENTED)
        .header(CONTENT_TYPE, "application/json; charset=utf-8")
        .body(Body::from(body))
        .unwrap_or_else(|_| status_only(StatusCode::NOT_IMPLEMENTED))
}
