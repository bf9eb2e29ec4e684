//! HTTP host exposing the speaker accessory to paired controllers.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::sse;
use warp::{Filter, Rejection, Reply};

use crate::accessory::{AccessoryDescription, SpeakerAccessory};
use crate::characteristic::CharacteristicEvent;
use crate::config::ServerConfig;
use crate::error::{
    CharacteristicError, PairingError, Result, ServerError, STATUS_INSUFFICIENT_PRIVILEGES,
    STATUS_INVALID_VALUE, STATUS_NOT_FOUND, STATUS_SUCCESS,
};
use crate::pairing::Pairings;

/// Header carrying the id a controller received from `/pair-setup`
pub const CONTROLLER_HEADER: &str = "x-controller-id";

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP host for a single speaker accessory.
///
/// The `AccessoryServer` binds to the first free port in the configured range
/// and serves the accessory database, characteristic reads and writes, and a
/// server-sent event stream of characteristic changes. Every endpoint except
/// `/pair-setup` requires a paired controller.
///
/// # Endpoints
///
/// | Method | Path | Purpose |
/// |---|---|---|
/// | POST | `/pair-setup` | Exchange the setup code for a controller id |
/// | GET | `/accessories` | Accessory database |
/// | GET | `/characteristics?id=1.9,1.10` | Read values |
/// | PUT | `/characteristics` | Write values (remote updates) |
/// | GET | `/events` | Change notifications (SSE) |
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use accessory_host::{AccessoryInfo, AccessoryServer, ServerConfig, SpeakerAccessory};
///
/// #[tokio::main]
/// async fn main() {
///     let accessory = Arc::new(SpeakerAccessory::new(AccessoryInfo::new("Desk speaker")));
///     let server = AccessoryServer::start(ServerConfig::default(), accessory)
///         .await
///         .expect("Failed to start accessory host");
///
///     println!("Accessory host listening at: {}", server.base_url());
///
///     server.shutdown().await.unwrap();
/// }
/// ```
pub struct AccessoryServer {
    /// The address the server is bound to
    addr: SocketAddr,
    /// URL controllers use to reach the server
    base_url: String,
    accessory: Arc<SpeakerAccessory>,
    pairings: Arc<Pairings>,
    /// Shutdown signal, also observed by open event streams
    shutdown_tx: watch::Sender<bool>,
    server_handle: Option<JoinHandle<()>>,
}

impl AccessoryServer {
    /// Bind and start serving `accessory`.
    ///
    /// Ports in `config.port_range` are tried in order; the first one that
    /// binds is used.
    pub async fn start(config: ServerConfig, accessory: Arc<SpeakerAccessory>) -> Result<Self> {
        config.validate()?;

        let pairings = Arc::new(Pairings::new(config.pin.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let routes = routes(
            Arc::clone(&accessory),
            Arc::clone(&pairings),
            shutdown_rx.clone(),
        );

        let (start, end) = config.port_range;
        let mut bound = None;
        for port in start..=end {
            let signal = wait_for_shutdown(shutdown_rx.clone());
            match warp::serve(routes.clone())
                .try_bind_with_graceful_shutdown(SocketAddr::new(config.bind_addr, port), signal)
            {
                Ok(server) => {
                    bound = Some(server);
                    break;
                }
                Err(e) => debug!(port, error = %e, "Port unavailable"),
            }
        }
        let (addr, server) = bound.ok_or(ServerError::NoAvailablePort { start, end })?;

        let host_ip = if addr.ip().is_unspecified() {
            detect_local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        } else {
            addr.ip()
        };
        let base_url = format!("http://{}", SocketAddr::new(host_ip, addr.port()));

        let server_handle = tokio::spawn(server);

        info!(
            %addr,
            name = %accessory.name(),
            device_id = accessory.device_id(),
            "Accessory host listening"
        );

        Ok(Self {
            addr,
            base_url,
            accessory,
            pairings,
            shutdown_tx,
            server_handle: Some(server_handle),
        })
    }

    /// Address the server is bound to
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Base URL for controllers, e.g. `http://192.168.1.20:51826`
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn accessory(&self) -> &Arc<SpeakerAccessory> {
        &self.accessory
    }

    pub fn pairings(&self) -> &Arc<Pairings> {
        &self.pairings
    }

    /// Shutdown the server gracefully.
    ///
    /// Open event streams are closed and in-flight requests are allowed to
    /// finish. If the server has not stopped within five seconds its task is
    /// aborted.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);

        if let Some(mut handle) = self.server_handle.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(ServerError::Shutdown(e.to_string())),
                Err(_) => {
                    handle.abort();
                    return Err(ServerError::Shutdown(
                        "timed out waiting for connections to close".to_string(),
                    ));
                }
            }
        }

        info!(addr = %self.addr, "Accessory host stopped");
        Ok(())
    }
}

impl Drop for AccessoryServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Detect the local IP address for the base URL.
///
/// This uses a UDP socket connection to determine the local IP address
/// that would be used for outbound connections. No data is actually sent.
fn detect_local_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip())
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct PairSetupRequest {
    pin: String,
}

#[derive(Debug, Serialize)]
struct PairSetupResponse {
    controller_id: String,
}

#[derive(Debug, Serialize)]
struct AccessoriesResponse {
    accessories: Vec<AccessoryDescription>,
}

#[derive(Debug, Deserialize)]
struct CharacteristicQuery {
    id: String,
}

/// One characteristic in a read response or write request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicEntry {
    pub aid: u64,
    pub iid: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
}

/// Body of characteristic reads and writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicsBody {
    pub characteristics: Vec<CharacteristicEntry>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: i32,
    message: &'static str,
}

#[derive(Debug)]
struct Unauthorized;

impl warp::reject::Reject for Unauthorized {}

// ============================================================================
// Routes
// ============================================================================

fn routes(
    accessory: Arc<SpeakerAccessory>,
    pairings: Arc<Pairings>,
    shutdown_rx: watch::Receiver<bool>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone + Send + Sync + 'static {
    let pair_setup = warp::path("pair-setup")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_pairings(Arc::clone(&pairings)))
        .map(pair_setup);

    let accessories = warp::path("accessories")
        .and(warp::path::end())
        .and(warp::get())
        .and(authorized(Arc::clone(&pairings)))
        .and(with_accessory(Arc::clone(&accessory)))
        .map(|accessory: Arc<SpeakerAccessory>| {
            warp::reply::json(&AccessoriesResponse {
                accessories: vec![accessory.describe()],
            })
        });

    let read = warp::path("characteristics")
        .and(warp::path::end())
        .and(warp::get())
        .and(authorized(Arc::clone(&pairings)))
        .and(warp::query::<CharacteristicQuery>())
        .and(with_accessory(Arc::clone(&accessory)))
        .map(read_characteristics);

    let write = warp::path("characteristics")
        .and(warp::path::end())
        .and(warp::put())
        .and(authorized(Arc::clone(&pairings)))
        .and(warp::body::json())
        .and(with_accessory(Arc::clone(&accessory)))
        .map(write_characteristics);

    let events = warp::path("events")
        .and(warp::path::end())
        .and(warp::get())
        .and(authorized(pairings))
        .and(with_accessory(accessory))
        .map(move |accessory: Arc<SpeakerAccessory>| {
            let stream = event_stream(accessory.subscribe_events(), shutdown_rx.clone());
            warp::sse::reply(warp::sse::keep_alive().stream(stream))
        });

    pair_setup
        .or(accessories)
        .or(read)
        .or(write)
        .or(events)
        .recover(handle_rejection)
}

fn with_accessory(
    accessory: Arc<SpeakerAccessory>,
) -> impl Filter<Extract = (Arc<SpeakerAccessory>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&accessory))
}

fn with_pairings(
    pairings: Arc<Pairings>,
) -> impl Filter<Extract = (Arc<Pairings>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&pairings))
}

/// Reject requests that do not name a paired controller.
fn authorized(pairings: Arc<Pairings>) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>(CONTROLLER_HEADER)
        .and_then(move |controller: Option<String>| {
            let pairings = Arc::clone(&pairings);
            async move {
                match controller {
                    Some(id) if pairings.is_paired(&id) => Ok(()),
                    _ => Err(warp::reject::custom(Unauthorized)),
                }
            }
        })
        .untuple_one()
}

// ============================================================================
// Handlers
// ============================================================================

fn pair_setup(request: PairSetupRequest, pairings: Arc<Pairings>) -> Response {
    match pairings.pair(&request.pin) {
        Ok(controller_id) => {
            info!(%controller_id, "Controller paired");
            warp::reply::json(&PairSetupResponse { controller_id }).into_response()
        }
        Err(e) => {
            warn!(error = %e, attempts = pairings.failed_attempts(), "Pairing refused");
            let code = match e {
                PairingError::WrongCode => StatusCode::UNAUTHORIZED,
                PairingError::LockedOut(_) => StatusCode::TOO_MANY_REQUESTS,
                PairingError::MaxPairings(_) => StatusCode::FORBIDDEN,
            };
            error_reply(code, e.status_code(), "Pairing refused")
        }
    }
}

fn read_characteristics(query: CharacteristicQuery, accessory: Arc<SpeakerAccessory>) -> Response {
    let Some(addresses) = parse_ids(&query.id) else {
        return error_reply(
            StatusCode::BAD_REQUEST,
            STATUS_INVALID_VALUE,
            "Malformed characteristic id list",
        );
    };

    let mut all_found = true;
    let characteristics = addresses
        .into_iter()
        .map(|(aid, iid)| match accessory.characteristic(aid, iid) {
            Some(characteristic) => CharacteristicEntry {
                aid,
                iid,
                value: Some(characteristic.json_value()),
                status: None,
            },
            None => {
                all_found = false;
                CharacteristicEntry {
                    aid,
                    iid,
                    value: None,
                    status: Some(STATUS_NOT_FOUND),
                }
            }
        })
        .collect();

    let status = if all_found {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    warp::reply::with_status(warp::reply::json(&CharacteristicsBody { characteristics }), status)
        .into_response()
}

fn write_characteristics(body: CharacteristicsBody, accessory: Arc<SpeakerAccessory>) -> Response {
    let statuses: Vec<CharacteristicEntry> = body
        .characteristics
        .into_iter()
        .map(|entry| {
            let status = match apply_write(&accessory, &entry) {
                Ok(changed) => {
                    debug!(aid = entry.aid, iid = entry.iid, changed, "Remote write applied");
                    STATUS_SUCCESS
                }
                Err(e) => {
                    warn!(aid = entry.aid, iid = entry.iid, error = %e, "Remote write rejected");
                    e.status_code()
                }
            };
            CharacteristicEntry {
                aid: entry.aid,
                iid: entry.iid,
                value: None,
                status: Some(status),
            }
        })
        .collect();

    if statuses.iter().all(|entry| entry.status == Some(STATUS_SUCCESS)) {
        return StatusCode::NO_CONTENT.into_response();
    }
    warp::reply::with_status(
        warp::reply::json(&CharacteristicsBody {
            characteristics: statuses,
        }),
        StatusCode::MULTI_STATUS,
    )
    .into_response()
}

fn apply_write(
    accessory: &SpeakerAccessory,
    entry: &CharacteristicEntry,
) -> std::result::Result<bool, CharacteristicError> {
    let characteristic = accessory
        .characteristic(entry.aid, entry.iid)
        .ok_or(CharacteristicError::NotFound {
            aid: entry.aid,
            iid: entry.iid,
        })?;

    let value = entry
        .value
        .as_ref()
        .ok_or_else(|| CharacteristicError::InvalidValue {
            format: "missing",
            value: "null".to_string(),
        })?;

    characteristic.write_json(value)
}

/// Parse `1.9,1.10` into `[(1, 9), (1, 10)]`
fn parse_ids(ids: &str) -> Option<Vec<(u64, u64)>> {
    ids.split(',')
        .map(|pair| {
            let (aid, iid) = pair.trim().split_once('.')?;
            Some((aid.parse().ok()?, iid.parse().ok()?))
        })
        .collect()
}

/// Stream accessory events until the bus closes or the server shuts down.
fn event_stream(
    events: broadcast::Receiver<CharacteristicEvent>,
    shutdown_rx: watch::Receiver<bool>,
) -> impl Stream<Item = std::result::Result<sse::Event, serde_json::Error>> + Send + 'static {
    futures::stream::unfold(
        (events, shutdown_rx),
        |(mut events, mut shutdown_rx)| async move {
            loop {
                if *shutdown_rx.borrow() {
                    return None;
                }

                tokio::select! {
                    received = events.recv() => match received {
                        Ok(event) => {
                            let message = sse::Event::default()
                                .event("characteristic")
                                .json_data(&event);
                            return Some((message, (events, shutdown_rx)));
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Event stream lagged behind accessory changes");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    },
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }
        },
    )
}

fn error_reply(code: StatusCode, status: i32, message: &'static str) -> Response {
    warp::reply::with_status(warp::reply::json(&ErrorBody { status, message }), code)
        .into_response()
}

/// Handle rejections and convert them to HTTP responses.
async fn handle_rejection(err: Rejection) -> std::result::Result<Response, Infallible> {
    let reply = if err.find::<Unauthorized>().is_some() {
        error_reply(
            StatusCode::UNAUTHORIZED,
            STATUS_INSUFFICIENT_PRIVILEGES,
            "Controller is not paired",
        )
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some()
        || err.find::<warp::reject::InvalidQuery>().is_some()
    {
        error_reply(StatusCode::BAD_REQUEST, STATUS_INVALID_VALUE, "Malformed request")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        error_reply(
            StatusCode::METHOD_NOT_ALLOWED,
            STATUS_NOT_FOUND,
            "Method not allowed",
        )
    } else if err.is_not_found() {
        error_reply(StatusCode::NOT_FOUND, STATUS_NOT_FOUND, "Not found")
    } else {
        warn!(rejection = ?err, "Unhandled rejection");
        error_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            STATUS_INVALID_VALUE,
            "Internal server error",
        )
    };

    Ok(reply)
}
