use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use backoff::{backoff::Backoff, ExponentialBackoff};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use shared::types::StableEndpointId;
use crate::discovery::GatewayDiscovery;
use crate::error::SessionError;
use crate::trust::TrustStore;
use super::handler::{CapabilitySource, EventSender, SessionHandler};
use super::protocol::{ClientFrame, ConnectAuth, ConnectParams, InvokeRequest, InvokeResponse, ServerFrame};
use super::state::SessionState;
use super::transport::{GatewayLink, GatewayTarget, GatewayTransport};

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub role: String,
    pub scopes: Vec<String>,
    pub client_id: String,
    pub client_mode: String,
    pub display_name: String,
    pub token: Option<String>,
    pub password: Option<String>,
    /// Pin certificates even for targets that do not advertise TLS
    pub require_tls: bool,
    pub discovery_timeout: Duration,
    pub handshake_timeout: Duration,
    pub paused_poll: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Pause between a forced disconnect and the next attempt
    pub reconnect_settle: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            role: "node".to_string(),
            scopes: Vec::new(),
            client_id: "hearth-node".to_string(),
            client_mode: "node".to_string(),
            display_name: "Hearth Node".to_string(),
            token: None,
            password: None,
            require_tls: false,
            discovery_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            paused_poll: Duration::from_secs(1),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(10),
            reconnect_settle: Duration::from_millis(200),
        }
    }
}

impl CoordinatorSettings {
    /// 1s, 2s, 4s, ... capped, no jitter, never gives up
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.backoff_initial,
            initial_interval: self.backoff_initial,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.backoff_max,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Fixed host:port instead of discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualTarget {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Selection {
    preferred: Option<StableEndpointId>,
    manual: Option<ManualTarget>,
}

struct Shared {
    settings: CoordinatorSettings,
    discovery: Arc<dyn GatewayDiscovery>,
    transport: Arc<dyn GatewayTransport>,
    trust: TrustStore,
    capabilities: Arc<dyn CapabilitySource>,
    handler: Weak<dyn SessionHandler>,
    state: watch::Sender<SessionState>,
    selection: watch::Sender<Selection>,
    paused: watch::Sender<bool>,
    /// Bumped to force the current connection down
    reconnect: watch::Sender<u64>,
}

impl Shared {
    fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            tracing::debug!("Session {} -> {}", state, next);
            *state = next;
            true
        });
    }

    fn force_reconnect(&self) {
        self.reconnect.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

/// Keeps one gateway session alive: discover, connect, authenticate,
/// serve, and back off and retry whenever any of it fails.
pub struct SessionCoordinator {
    shared: Arc<Shared>,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl SessionCoordinator {
    pub fn new(
        settings: CoordinatorSettings,
        discovery: Arc<dyn GatewayDiscovery>,
        transport: Arc<dyn GatewayTransport>,
        trust: TrustStore,
        capabilities: Arc<dyn CapabilitySource>,
        handler: Weak<dyn SessionHandler>,
    ) -> Self {
        let shared = Shared {
            settings,
            discovery,
            transport,
            trust,
            capabilities,
            handler,
            state: watch::Sender::new(SessionState::Idle),
            selection: watch::Sender::new(Selection::default()),
            paused: watch::Sender::new(false),
            reconnect: watch::Sender::new(0),
        };

        Self {
            shared: Arc::new(shared),
            running: Mutex::new(None),
        }
    }

    /// Spawn the supervisor. No-op while one is running.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(&*running, Some((_, handle)) if !handle.is_finished()) {
            return;
        }

        tracing::info!("Starting gateway session");
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(self.shared.clone(), cancel.clone()));
        *running = Some((cancel, handle));
    }

    /// Cancel whatever the supervisor is doing and wait for it to finish.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some((cancel, handle)) = running {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::error!("Session supervisor failed: {}", e);
            }
        }
        self.shared.set_state(SessionState::Idle);
    }

    /// Paused sessions skip connection attempts until resumed.
    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.send_replace(paused);
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.paused.borrow()
    }

    /// Capabilities changed: reconnect so the gateway sees the new set.
    pub fn refresh_capabilities(&self) {
        tracing::info!("Capabilities changed; reconnecting");
        self.shared.force_reconnect();
    }

    pub fn set_preferred_gateway(&self, stable_id: Option<StableEndpointId>) {
        self.shared.selection.send_modify(|selection| selection.preferred = stable_id);
        self.shared.force_reconnect();
    }

    pub fn preferred_gateway(&self) -> Option<StableEndpointId> {
        self.shared.selection.borrow().preferred.clone()
    }

    pub fn set_manual_target(&self, target: Option<ManualTarget>) {
        self.shared.selection.send_modify(|selection| selection.manual = target);
        self.shared.force_reconnect();
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }
}

/// How one pass through the loop ended.
enum Ended {
    Cancelled,
    ReconnectRequested,
    Failed(SessionError),
}

async fn supervise(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut backoff = shared.settings.backoff();
    let mut reconnect_rx = shared.reconnect.subscribe();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if *shared.paused.borrow() {
            shared.set_state(SessionState::Disconnected("paused".to_string()));
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(shared.settings.paused_poll) => continue,
            }
        }

        // Anything requested before this attempt is already honoured by it
        reconnect_rx.borrow_and_update();

        let ended = attempt(&shared, &cancel, &mut reconnect_rx, &mut backoff).await;
        let delay = match ended {
            Ended::Cancelled => break,
            Ended::ReconnectRequested => {
                shared.set_state(SessionState::Disconnected("reconnecting".to_string()));
                shared.settings.reconnect_settle
            }
            Ended::Failed(error) => {
                let reason = error.reason();
                if error.is_surfaced() {
                    tracing::error!("Gateway session failed: {}", reason);
                } else {
                    tracing::warn!("Gateway session failed: {}", reason);
                }
                shared.set_state(SessionState::Disconnected(reason));
                backoff.next_backoff().unwrap_or(shared.settings.backoff_max)
            }
        };

        tracing::debug!("Next attempt in {:?}", delay);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = reconnect_rx.changed() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.set_state(SessionState::Idle);
    tracing::info!("Gateway session stopped");
}

/// Connect, run the session until it ends, report to the handler.
async fn attempt(
    shared: &Arc<Shared>,
    cancel: &CancellationToken,
    reconnect_rx: &mut watch::Receiver<u64>,
    backoff: &mut ExponentialBackoff,
) -> Ended {
    let connected = tokio::select! {
        _ = cancel.cancelled() => return Ended::Cancelled,
        _ = reconnect_rx.changed() => return Ended::ReconnectRequested,
        result = connect(shared) => result,
    };

    let link = match connected {
        Ok(link) => link,
        Err(error) => {
            if error.is_surfaced() {
                notify_disconnected(shared, &error.reason()).await;
            }
            return Ended::Failed(error);
        }
    };

    backoff.reset();
    let ended = serve(shared, link, cancel, reconnect_rx).await;

    let reason = match &ended {
        Ended::Cancelled => "session stopped".to_string(),
        Ended::ReconnectRequested => "reconnecting".to_string(),
        Ended::Failed(error) => error.reason(),
    };
    notify_disconnected(shared, &reason).await;
    ended
}

async fn notify_disconnected(shared: &Shared, reason: &str) {
    if let Some(handler) = shared.handler.upgrade() {
        let reason = reason.to_string();
        let _ = isolated("on_disconnected", async move { handler.on_disconnected(&reason).await }).await;
    }
}

/// Run application code on its own task so a panic there cannot end the
/// supervisor.
async fn isolated<F>(what: &str, task: F) -> Result<F::Output, SessionError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(task).await.map_err(|e| {
        tracing::error!("Session handler {} failed: {}", what, e);
        SessionError::Handler(format!("{} {}", what, e))
    })
}

/// Discover, open the transport and complete the handshake.
async fn connect(shared: &Shared) -> Result<Box<dyn GatewayLink>, SessionError> {
    shared.set_state(SessionState::Discovering);
    let target = resolve_target(shared).await?;

    shared.set_state(SessionState::Connecting);
    let policy = if target.tls || shared.settings.require_tls {
        Some(
            shared
                .trust
                .policy_for(
                    target.stable_id.as_str(),
                    true,
                    target.advertised_fingerprint.as_deref(),
                )
                .await?,
        )
    } else {
        None
    };
    tracing::info!("Connecting to {} at {}:{}", target.display_name, target.host, target.port);
    let mut link = shared.transport.connect(&target, policy.as_ref()).await?;

    shared.set_state(SessionState::Authenticating);
    match handshake(shared, link.as_mut()).await {
        Ok(()) => {
            tracing::info!("Connected to gateway {}", target.display_name);
            Ok(link)
        }
        Err(e) => {
            link.close().await;
            Err(e)
        }
    }
}

async fn resolve_target(shared: &Shared) -> Result<GatewayTarget, SessionError> {
    let selection = shared.selection.borrow().clone();
    if let Some(manual) = selection.manual {
        return Ok(GatewayTarget::direct(&manual.host, manual.port, manual.tls));
    }

    let found = shared.discovery.discover(shared.settings.discovery_timeout).await;
    let chosen = selection
        .preferred
        .as_ref()
        .and_then(|preferred| found.iter().find(|g| &g.stable_id == preferred))
        .or_else(|| found.first())
        .ok_or(SessionError::NoGateway)?;

    Ok(GatewayTarget::from(chosen))
}

async fn handshake(shared: &Shared, link: &mut dyn GatewayLink) -> Result<(), SessionError> {
    let settings = &shared.settings;
    let capabilities = shared.capabilities.clone();
    let snapshot = isolated("capability snapshot", async move { capabilities.snapshot().await }).await?;
    let params = ConnectParams {
        role: settings.role.clone(),
        scopes: settings.scopes.clone(),
        caps: snapshot.caps,
        commands: snapshot.commands,
        permissions: snapshot.permissions,
        client_id: settings.client_id.clone(),
        client_mode: settings.client_mode.clone(),
        client_display_name: settings.display_name.clone(),
        auth: ConnectAuth {
            token: settings.token.clone(),
            password: settings.password.clone(),
        },
    };
    link.send(ClientFrame::Connect { params }).await?;

    let reply = tokio::time::timeout(settings.handshake_timeout, link.recv())
        .await
        .map_err(|_| SessionError::HandshakeTimeout(settings.handshake_timeout))??;

    match reply {
        Some(ServerFrame::HelloOk { .. }) => Ok(()),
        Some(ServerFrame::Error { code, message }) => {
            Err(SessionError::AuthenticationFailure(format!("{}: {}", code, message)))
        }
        Some(ServerFrame::Invoke(request)) => Err(SessionError::Protocol(format!(
            "invoke {} before hello-ok",
            request.id
        ))),
        None => Err(SessionError::TransportDropped("closed during handshake".to_string())),
    }
}

/// One step of a connected session.
enum Step {
    Cancelled,
    Reconnect,
    Inbound(Result<Option<ServerFrame>, SessionError>),
    Answered(Result<InvokeResponse, tokio::task::JoinError>),
    Outbound((String, Value)),
}

async fn serve(
    shared: &Arc<Shared>,
    mut link: Box<dyn GatewayLink>,
    cancel: &CancellationToken,
    reconnect_rx: &mut watch::Receiver<u64>,
) -> Ended {
    shared.set_state(SessionState::Connected);

    let (event_tx, mut event_rx) = mpsc::channel::<(String, Value)>(64);
    if let Some(handler) = shared.handler.upgrade() {
        let events = EventSender::new(event_tx.clone());
        let _ = isolated("on_connected", async move { handler.on_connected(events).await }).await;
    }

    let mut invokes: JoinSet<InvokeResponse> = JoinSet::new();

    let ended = loop {
        let step = tokio::select! {
            _ = cancel.cancelled() => Step::Cancelled,
            _ = reconnect_rx.changed() => Step::Reconnect,
            frame = link.recv() => Step::Inbound(frame),
            Some(answered) = invokes.join_next() => Step::Answered(answered),
            Some(event) = event_rx.recv() => Step::Outbound(event),
        };

        match step {
            Step::Cancelled => break Ended::Cancelled,
            Step::Reconnect => break Ended::ReconnectRequested,
            Step::Inbound(Ok(Some(ServerFrame::Invoke(request)))) => {
                tracing::debug!("Invoke {} ({})", request.id, request.command);
                invokes.spawn(dispatch(shared.handler.clone(), request));
            }
            Step::Inbound(Ok(Some(ServerFrame::Error { code, message }))) => {
                break Ended::Failed(SessionError::TransportDropped(format!(
                    "gateway error {}: {}",
                    code, message
                )));
            }
            Step::Inbound(Ok(Some(ServerFrame::HelloOk { .. }))) => {
                tracing::debug!("Ignoring repeated hello-ok");
            }
            Step::Inbound(Ok(None)) => {
                break Ended::Failed(SessionError::TransportDropped(
                    "connection closed by gateway".to_string(),
                ));
            }
            Step::Inbound(Err(e)) => break Ended::Failed(e),
            Step::Answered(Ok(response)) => {
                if let Err(e) = link.send(ClientFrame::InvokeResult(response)).await {
                    break Ended::Failed(e);
                }
            }
            Step::Answered(Err(e)) => {
                tracing::error!("Invoke handler task failed: {}", e);
            }
            Step::Outbound((event, payload)) => {
                if let Err(e) = link.send(ClientFrame::Event { event, payload }).await {
                    break Ended::Failed(e);
                }
            }
        }
    };

    // Closes every EventSender handed out for this connection
    drop(event_rx);
    invokes.abort_all();
    link.close().await;
    ended
}

async fn dispatch(handler: Weak<dyn SessionHandler>, request: InvokeRequest) -> InvokeResponse {
    match handler.upgrade() {
        Some(handler) => handler.on_invoke(request).await,
        None => InvokeResponse::unavailable(request.id),
    }
}
