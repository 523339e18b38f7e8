use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::unbounded;
use crossbeam_channel::Sender;
use omm_types::DomainType;
use omm_types::GenericMsg;
use omm_types::Handle;
use omm_types::PostMsg;
use omm_types::RequestMsg;
use omm_types::Transport;
use parking_lot::Mutex;
use tracing::info;
use tracing::warn;

use crate::channel::ChannelInfo;
use crate::channel::ChannelState;
use crate::client::ConsumerClient;
use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::commands::Command;
use crate::config::DispatchMode;
use crate::config::SessionConfig;
use crate::dispatcher::Dispatcher;
use crate::errors::Result;
use crate::errors::SessionError;
use crate::item::ServiceSelector;
use crate::shared::HandleEntry;
use crate::shared::HandleKind;
use crate::shared::SharedHandle;
use crate::shared::SharedState;

const LOGIN_POLL: Duration = Duration::from_millis(10);
const API_DISPATCH_TIMEOUT: Duration = Duration::from_millis(100);

/// Application-facing consumer session spanning every configured channel
///
/// Calls only validate against the handle table and enqueue an intent; routing happens on
/// the dispatcher, either a session-owned thread or the caller of [`OmmConsumer::dispatch`].
pub struct OmmConsumer {
    commands: Sender<Command>,
    shared: SharedHandle,
    next_handle: AtomicU64,
    mode: DispatchMode,
    /// Owned here in user dispatch mode
    dispatcher: Option<Mutex<Dispatcher>>,
    worker: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl OmmConsumer {
    /// Connects and logs in; fails unless at least one channel becomes active
    pub fn new(config: SessionConfig, transport: impl Transport + 'static) -> Result<Self> {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SessionConfig, mut transport: impl Transport + 'static, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let (event_tx, event_rx) = unbounded();
        let (command_tx, command_rx) = unbounded();
        transport.attach(event_tx);

        let shared: SharedHandle = Arc::new(Mutex::new(SharedState::default()));
        let mode = config.dispatch;
        let login_timeout = config.login_timeout();
        let name = config.name.clone();

        let mut dispatcher = Dispatcher::new(config, Box::new(transport), clock, event_rx, command_rx, Arc::clone(&shared));
        dispatcher.start();
        Self::await_login(&mut dispatcher, login_timeout)?;
        info!(session = %name, mode = ?mode, "Consumer session ready");

        let running = Arc::new(AtomicBool::new(true));
        let (dispatcher, worker) = match mode {
            DispatchMode::User => (Some(Mutex::new(dispatcher)), None),
            DispatchMode::Api => {
                let flag = Arc::clone(&running);
                let worker = std::thread::Builder::new()
                    .name("omm-dispatcher".to_string())
                    .spawn(move || {
                        while flag.load(Ordering::Acquire) && !dispatcher.is_shutdown() {
                            dispatcher.dispatch(API_DISPATCH_TIMEOUT);
                        }
                        dispatcher.shutdown();
                    })
                    .map_err(|err| SessionError::Thread(err.to_string()))?;
                (None, Some(worker))
            }
        };

        Ok(Self { commands: command_tx, shared, next_handle: AtomicU64::new(1), mode, dispatcher, worker, running })
    }

    fn await_login(dispatcher: &mut Dispatcher, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            dispatcher.dispatch(LOGIN_POLL);
            let states = dispatcher.channel_states();
            if states.contains(&ChannelState::Active) {
                return Ok(());
            }
            if states.iter().all(|state| *state == ChannelState::Closed) {
                dispatcher.shutdown();
                return Err(SessionError::NoChannelLoggedIn("every channel failed to connect or log in".to_string()));
            }
            if Instant::now() >= deadline {
                dispatcher.shutdown();
                return Err(SessionError::NoChannelLoggedIn(format!("login timed out after {}ms", timeout.as_millis())));
            }
        }
    }

    /// Opens an item, batch, login or directory stream
    ///
    /// A batch request returns the batch handle; every item of the batch gets its own child
    /// handle, reported as `ConsumerEvent::handle` with the batch handle as parent.
    pub fn register_client(&self, request: RequestMsg, client: impl ConsumerClient + 'static) -> Result<Handle> {
        self.ensure_running()?;

        let handle = self.allocate_handle();
        let mut children = Vec::new();
        let mut shared = self.shared.lock();

        match request.domain {
            DomainType::Login => {
                shared.handles.insert(handle, HandleEntry { kind: HandleKind::Login, parent: None });
            }
            DomainType::Source => {
                shared.handles.insert(handle, HandleEntry { kind: HandleKind::Directory, parent: None });
            }
            domain if request.is_batch() => {
                let selector = ServiceSelector::from_request(&request);
                for name in &request.batch {
                    let child = self.allocate_handle();
                    let kind = HandleKind::Item { domain, name: Some(name.clone()), selector: selector.clone() };
                    shared.handles.insert(child, HandleEntry { kind, parent: Some(handle) });
                    children.push(child);
                }
                let kind = HandleKind::Batch { domain, selector, children: children.clone() };
                shared.handles.insert(handle, HandleEntry { kind, parent: None });
            }
            domain => {
                if request.key.name.is_none() {
                    warn!(%domain, "Item request without a name");
                    return Err(SessionError::InvalidUsage("item request carries no name".to_string()));
                }
                let kind = HandleKind::Item { domain, name: request.key.name.clone(), selector: ServiceSelector::from_request(&request) };
                shared.handles.insert(handle, HandleEntry { kind, parent: None });
            }
        }
        drop(shared);

        self.send(Command::Register { handle, request, client: Box::new(client), children })?;
        Ok(handle)
    }

    /// Changes QoS, priority or streaming of an open item on its current channel
    pub fn reissue(&self, handle: Handle, request: RequestMsg) -> Result<()> {
        self.ensure_running()?;
        {
            let shared = self.shared.lock();
            let entry = shared.handles.get(&handle).ok_or(SessionError::UnknownHandle(handle))?;
            let HandleKind::Item { domain, selector, .. } = &entry.kind else {
                return Err(SessionError::InvalidUsage(format!("{handle} is not an item stream")));
            };
            if *domain != request.domain {
                return Err(SessionError::InvalidUsage(format!("reissue cannot change domain {domain} to {}", request.domain)));
            }
            let requested = ServiceSelector::from_request(&request);
            if requested != ServiceSelector::Unspecified && requested != *selector {
                return Err(SessionError::InvalidUsage("reissue cannot change the service".to_string()));
            }
        }
        self.send(Command::Reissue { handle, request })
    }

    /// Closes a stream; no callback is made for it afterwards
    pub fn unregister(&self, handle: Handle) -> Result<()> {
        self.ensure_running()?;
        let entry = self.shared.lock().remove(handle).ok_or(SessionError::UnknownHandle(handle))?;
        let children = match entry.kind {
            HandleKind::Batch { children, .. } => children,
            _ => Vec::new(),
        };
        self.send(Command::Unregister { handle, children })
    }

    /// Posts on an item stream, or off-stream through a login handle
    pub fn submit_post(&self, handle: Handle, post: PostMsg) -> Result<()> {
        self.ensure_running()?;
        let service_id = {
            let shared = self.shared.lock();
            let entry = shared.handles.get(&handle).ok_or(SessionError::UnknownHandle(handle))?;
            match entry.kind {
                HandleKind::Item { .. } => None,
                HandleKind::Login => match shared.resolve_service(&post.key) {
                    Some(service_id) => Some(service_id),
                    None => {
                        warn!(%handle, key = ?post.key, "Off-stream post names no known service");
                        return Err(SessionError::InvalidUsage("off-stream post must name an available service".to_string()));
                    }
                },
                HandleKind::Batch { .. } | HandleKind::Directory => {
                    return Err(SessionError::InvalidUsage(format!("{handle} does not accept posts")));
                }
            }
        };
        self.send(Command::SubmitPost { handle, post, service_id })
    }

    /// Sends a generic message on an item or login stream
    pub fn submit_generic(&self, handle: Handle, generic: GenericMsg) -> Result<()> {
        self.ensure_running()?;
        {
            let shared = self.shared.lock();
            let entry = shared.handles.get(&handle).ok_or(SessionError::UnknownHandle(handle))?;
            if !matches!(entry.kind, HandleKind::Item { .. } | HandleKind::Login) {
                return Err(SessionError::InvalidUsage(format!("{handle} does not accept generic messages")));
            }
        }
        self.send(Command::SubmitGeneric { handle, generic })
    }

    /// Snapshot of every channel as of the last dispatch
    pub fn session_information(&self) -> Vec<ChannelInfo> {
        self.shared.lock().channels.clone()
    }

    /// Logical id the aggregated directory assigned to `service`
    pub fn service_id(&self, service: &str) -> Option<u16> {
        self.shared.lock().services.get(service).copied()
    }

    /// Moves traffic back to the preferred channels
    pub fn fallback_preferred_host(&self) -> Result<()> {
        self.ensure_running()?;
        self.send(Command::FallbackPreferredHost)
    }

    /// Runs the dispatcher on the calling thread, user dispatch mode only
    pub fn dispatch(&self, timeout: Duration) -> Result<usize> {
        let Some(dispatcher) = &self.dispatcher else {
            return Err(SessionError::InvalidUsage("dispatch is driven by the session thread".to_string()));
        };
        let mut dispatcher = dispatcher.lock();
        if dispatcher.is_shutdown() {
            return Err(SessionError::Shutdown);
        }
        Ok(dispatcher.dispatch(timeout))
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.mode
    }

    fn allocate_handle(&self) -> Handle {
        Handle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn ensure_running(&self) -> Result<()> {
        if self.running.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SessionError::Shutdown)
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| SessionError::Shutdown)
    }
}

impl Drop for OmmConsumer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Dispatcher thread panicked");
            }
        }
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.lock().shutdown();
        }
    }
}

impl std::fmt::Debug for OmmConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OmmConsumer").field("mode", &self.mode).field("handles", &self.shared.lock().handles.len()).finish()
    }
}
