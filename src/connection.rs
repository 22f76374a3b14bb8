use futures::{SinkExt, StreamExt, future};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, sleep_until};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::codec::StompCodec;
use crate::error::{ConnError, ServerError};
use crate::event::Event;
use crate::frame::{Frame, commands};
use crate::options::Options;
use crate::receipt::{ReceiptWait, Receipts};
use crate::subscription::{AckMode, Destination, MessageCallback, SubscriptionEntry, Subscriptions};
use crate::transaction::Transactions;
use crate::transport::{self, BoxedTransport};

const OUTBOUND_CAPACITY: usize = 32;

/// Lifecycle of a [`Connection`].
///
/// ```text
/// Uninitialized -> Initialized -> Connecting -> Connected -> Disconnecting -> Disconnected
///                                     |                                           |
///                                     +------------> (transport closes) ---------+
/// ```
///
/// `Disconnected` is only reached once the transport has actually finished
/// closing; `disconnect()` merely moves to `Disconnecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initialized,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Work items for the background I/O task.
enum Outbound {
    Frame(Frame),
    /// Half-close the transport and wait for the peer to finish.
    Close,
}

/// State shared between the `Connection` handles and the I/O task.
struct Shared {
    state: ConnectionState,
    options: Option<Arc<Options>>,
    session: Option<String>,
    subscriptions: Subscriptions,
    transactions: Transactions,
    outbound_tx: Option<mpsc::Sender<Outbound>>,
    receipts: Receipts,
}

impl Shared {
    fn new(options: Option<Options>) -> Self {
        let state = if options.is_some() {
            ConnectionState::Initialized
        } else {
            ConnectionState::Uninitialized
        };
        Self {
            state,
            options: options.map(Arc::new),
            session: None,
            subscriptions: Subscriptions::new(),
            transactions: Transactions::new(),
            outbound_tx: None,
            receipts: Receipts::new(),
        }
    }

    /// Writer for session operations, available only once CONNECTED.
    fn sender(&self) -> Result<mpsc::Sender<Outbound>, ConnError> {
        match self.state {
            ConnectionState::Uninitialized => Err(ConnError::NotInitialized),
            ConnectionState::Connected => self.outbound_tx.clone().ok_or(ConnError::NotConnected),
            _ => Err(ConnError::NotConnected),
        }
    }

    fn debug_enabled(&self) -> bool {
        self.options.as_ref().is_some_and(|o| o.debug)
    }

    /// Forget everything tied to the previous session.
    fn reset_session(&mut self) {
        self.session = None;
        self.subscriptions.clear();
        self.transactions.reset();
        self.receipts.clear();
    }
}

/// A STOMP client connection.
///
/// The `Connection` spawns a background task that owns the transport, writes
/// outbound frames, decodes inbound frames with `StompCodec` and dispatches
/// them: MESSAGE frames run the callback registered for their destination,
/// and every notable occurrence is published as an [`Event`].
///
/// Misuse (an operation in the wrong state) is reported synchronously as an
/// `Err`. Transport failures and broker ERROR frames arrive as
/// [`Event::Error`]. Handles are cheap to clone and share the same state.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Mutex<Shared>>,
    events_tx: mpsc::UnboundedSender<Event>,
    /// Shared behind a mutex so cloned handles can await events.
    events_rx: Arc<Mutex<mpsc::UnboundedReceiver<Event>>>,
}

impl Default for Connection {
    /// An uninitialized connection; call [`Connection::initialize`] before use.
    fn default() -> Self {
        Self::build(None)
    }
}

impl Connection {
    /// Create an initialized connection from resolved options.
    pub fn new(options: Options) -> Self {
        Self::build(Some(options))
    }

    fn build(options: Option<Options>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Mutex::new(Shared::new(options))),
            events_tx,
            events_rx: Arc::new(Mutex::new(events_rx)),
        }
    }

    /// Supply options to a connection created with `Connection::default()`.
    pub async fn initialize(&self, options: Options) -> Result<(), ConnError> {
        let mut shared = self.shared.lock().await;
        if shared.state != ConnectionState::Uninitialized {
            return Err(ConnError::InvalidState(shared.state));
        }
        shared.options = Some(Arc::new(options));
        shared.state = ConnectionState::Initialized;
        Ok(())
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.lock().await.state
    }

    pub async fn is_initialized(&self) -> bool {
        self.state().await != ConnectionState::Uninitialized
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Session id from the CONNECTED frame of the current connection.
    pub async fn session(&self) -> Option<String> {
        self.shared.lock().await.session.clone()
    }

    pub async fn options(&self) -> Option<Options> {
        self.shared.lock().await.options.as_deref().cloned()
    }

    /// Registry entry for `destination`, including disabled ones.
    pub async fn subscription(&self, destination: &str) -> Option<SubscriptionEntry> {
        self.shared
            .lock()
            .await
            .subscriptions
            .get(destination)
            .cloned()
    }

    /// Every destination present in the registry, sorted.
    pub async fn subscribed_destinations(&self) -> Vec<String> {
        self.shared.lock().await.subscriptions.destinations()
    }

    /// Open the transport described by the options and start the session.
    ///
    /// Returns once the I/O task is running; `Event::Connected` follows
    /// when the broker answers CONNECT. Transport failures are reported as
    /// `Event::Error` followed by `Event::Disconnected`.
    pub async fn connect(&self) -> Result<(), ConnError> {
        let (options, outbound_rx) = self.prepare_connect().await?;
        debug!(addr = %options.addr(), ssl = options.ssl, "connecting");

        let shared = self.shared.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            match transport::open(&options).await {
                Ok(stream) => {
                    let had_error =
                        run_session(stream, options, outbound_rx, shared.clone(), events.clone())
                            .await;
                    finish(&shared, &events, had_error).await;
                }
                Err(e) => {
                    error!(addr = %options.addr(), error = %e, "failed to open transport");
                    let _ = events.send(Event::Error(e));
                    finish(&shared, &events, true).await;
                }
            }
        });
        Ok(())
    }

    /// Run the session over an already established stream instead of
    /// opening one from the options.
    pub async fn connect_with<S>(&self, stream: S) -> Result<(), ConnError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (options, outbound_rx) = self.prepare_connect().await?;
        let shared = self.shared.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let had_error =
                run_session(Box::new(stream), options, outbound_rx, shared.clone(), events.clone())
                    .await;
            finish(&shared, &events, had_error).await;
        });
        Ok(())
    }

    async fn prepare_connect(
        &self,
    ) -> Result<(Arc<Options>, mpsc::Receiver<Outbound>), ConnError> {
        let mut shared = self.shared.lock().await;
        let options = match shared.state {
            ConnectionState::Uninitialized => return Err(ConnError::NotInitialized),
            ConnectionState::Initialized | ConnectionState::Disconnected => shared
                .options
                .clone()
                .ok_or(ConnError::NotInitialized)?,
            other => return Err(ConnError::InvalidState(other)),
        };
        let (tx, rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
        shared.reset_session();
        shared.outbound_tx = Some(tx);
        shared.state = ConnectionState::Connecting;
        Ok((options, rx))
    }

    /// Request a graceful close.
    ///
    /// The transport is half-closed and the connection enters
    /// `Disconnecting`. `Event::Disconnected` is published when the peer
    /// finishes closing; calling this again meanwhile is a no-op.
    pub async fn disconnect(&self) -> Result<(), ConnError> {
        let tx = {
            let mut shared = self.shared.lock().await;
            match shared.state {
                ConnectionState::Uninitialized => return Err(ConnError::NotInitialized),
                ConnectionState::Connecting | ConnectionState::Connected => {
                    shared.state = ConnectionState::Disconnecting;
                    shared.outbound_tx.clone()
                }
                other => {
                    debug!(state = ?other, "disconnect ignored");
                    return Ok(());
                }
            }
        };
        debug!("ending socket");
        if let Some(tx) = tx {
            // The I/O task may already be gone; it finishes teardown itself.
            let _ = tx.send(Outbound::Close).await;
        }
        Ok(())
    }

    /// Receive the next event. Waits until one is available.
    pub async fn next_event(&self) -> Option<Event> {
        let mut rx = self.events_rx.lock().await;
        rx.recv().await
    }

    /// Receive an event if one is already queued.
    ///
    /// Returns `None` without waiting when another handle is currently
    /// inside [`Connection::next_event`].
    pub fn try_next_event(&self) -> Option<Event> {
        let mut rx = self.events_rx.try_lock().ok()?;
        rx.try_recv().ok()
    }

    async fn write(&self, tx: &mpsc::Sender<Outbound>, frame: Frame) -> Result<(), ConnError> {
        tx.send(Outbound::Frame(frame))
            .await
            .map_err(|_| ConnError::Protocol("send channel closed".into()))
    }

    /// Send a prepared frame as is. Requires `Connected`.
    pub async fn send_frame(&self, frame: Frame) -> Result<(), ConnError> {
        let tx = self.shared.lock().await.sender()?;
        self.write(&tx, frame).await
    }

    /// Subscribe `callback` to one or more destinations.
    ///
    /// One SUBSCRIBE frame is sent per destination, each registering the same
    /// callback; a single `Event::Subscribed` follows.
    pub async fn subscribe<F>(
        &self,
        destination: impl Into<Destination>,
        ack: AckMode,
        callback: F,
    ) -> Result<(), ConnError>
    where
        F: Fn(&[u8], &[(String, String)]) + Send + Sync + 'static,
    {
        self.subscribe_with_headers(destination, ack, Vec::new(), Some(Arc::new(callback)))
            .await
    }

    /// Subscribe with extra SUBSCRIBE headers and an optional callback.
    ///
    /// Without a callback, messages for the destination are only visible as
    /// `Event::Message`.
    pub async fn subscribe_with_headers(
        &self,
        destination: impl Into<Destination>,
        ack: AckMode,
        extra_headers: Vec<(String, String)>,
        callback: Option<MessageCallback>,
    ) -> Result<(), ConnError> {
        let destinations = destination.into().names();
        let (tx, frames) = {
            let mut shared = self.shared.lock().await;
            let tx = shared.sender()?;
            let mut frames = Vec::with_capacity(destinations.len());
            for dest in &destinations {
                let mut f = Frame::new(commands::SUBSCRIBE)
                    .header("destination", dest.as_str())
                    .header("ack", ack.as_str());
                for (k, v) in &extra_headers {
                    f.set_header(k.as_str(), v.as_str());
                }
                if let Some(session) = &shared.session {
                    f.set_header("session", session.as_str());
                }
                shared.subscriptions.subscribe(dest, ack, callback.clone());
                debug!(destination = %dest, ack = ack.as_str(), "subscribed");
                frames.push(f);
            }
            (tx, frames)
        };

        for f in frames {
            self.write(&tx, f).await?;
        }
        let _ = self.events_tx.send(Event::Subscribed(destinations));
        Ok(())
    }

    /// Unsubscribe from one or more destinations.
    ///
    /// Registry entries are disabled, not removed: a MESSAGE still in flight
    /// for the destination is published as `Event::Message` but no longer
    /// reaches the callback.
    pub async fn unsubscribe(&self, destination: impl Into<Destination>) -> Result<(), ConnError> {
        let destinations = destination.into().names();
        let (tx, frames) = {
            let mut shared = self.shared.lock().await;
            let tx = shared.sender()?;
            let mut frames = Vec::with_capacity(destinations.len());
            for dest in &destinations {
                let mut f = Frame::new(commands::UNSUBSCRIBE).header("destination", dest.as_str());
                if let Some(session) = &shared.session {
                    f.set_header("session", session.as_str());
                }
                if shared.subscriptions.disable(dest) {
                    debug!(destination = %dest, "no longer subscribed");
                } else {
                    debug!(destination = %dest, "unsubscribing from unknown destination");
                }
                frames.push(f);
            }
            (tx, frames)
        };

        for f in frames {
            self.write(&tx, f).await?;
        }
        let _ = self.events_tx.send(Event::Unsubscribed(destinations));
        Ok(())
    }

    /// Send a message.
    ///
    /// A `body` entry in `headers` is taken out and used as the payload.
    /// Returns the frame as transmitted, including any generated `receipt`.
    pub async fn send(
        &self,
        mut headers: Vec<(String, String)>,
        want_receipt: bool,
    ) -> Result<Frame, ConnError> {
        let body = take_body(&mut headers);
        self.send_message(headers, body, None, want_receipt).await
    }

    /// Send a message with an explicit (possibly binary) body.
    pub async fn send_bytes(
        &self,
        headers: Vec<(String, String)>,
        body: impl Into<Vec<u8>>,
        want_receipt: bool,
    ) -> Result<Frame, ConnError> {
        self.send_message(headers, body.into(), None, want_receipt)
            .await
    }

    /// Send a message as part of a transaction started with [`Connection::begin`].
    pub async fn send_in(
        &self,
        transaction_id: &str,
        mut headers: Vec<(String, String)>,
        want_receipt: bool,
    ) -> Result<Frame, ConnError> {
        let body = take_body(&mut headers);
        self.send_message(headers, body, Some(transaction_id), want_receipt)
            .await
    }

    async fn send_message(
        &self,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        transaction_id: Option<&str>,
        want_receipt: bool,
    ) -> Result<Frame, ConnError> {
        let (tx, frame) = {
            let mut shared = self.shared.lock().await;
            let tx = shared.sender()?;
            let mut frame = Frame::new(commands::SEND);
            for (k, v) in headers {
                frame.set_header(k, v);
            }
            if let Some(id) = transaction_id {
                frame = Transactions::tag(frame, id);
            }
            let session = shared.session.clone();
            if let Some(s) = &session {
                frame.set_header("session", s.as_str());
            }
            frame.body = body;
            if want_receipt {
                let receipt_id = frame.stamp_receipt(session.as_deref());
                shared.receipts.expect(&receipt_id);
            }
            (tx, frame)
        };

        self.write(&tx, frame.clone()).await?;
        Ok(frame)
    }

    /// Wait for the RECEIPT answering a `send` made with `want_receipt`.
    ///
    /// Resolves immediately if the receipt already arrived. Each receipt id
    /// can be awaited once. Only the most recent answered receipts are
    /// remembered for a wait that starts after they arrived.
    pub async fn wait_for_receipt(
        &self,
        receipt_id: &str,
        timeout: Duration,
    ) -> Result<(), ConnError> {
        let rx = match self.shared.lock().await.receipts.wait(receipt_id)? {
            ReceiptWait::Ready => return Ok(()),
            ReceiptWait::Pending(rx) => rx,
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ConnError::Protocol(
                "receipt channel closed unexpectedly".into(),
            )),
            Err(_) => {
                self.shared.lock().await.receipts.abandon(receipt_id);
                Err(ConnError::ReceiptTimeout(receipt_id.to_string()))
            }
        }
    }

    /// Acknowledge a message by its `message-id`.
    pub async fn ack(&self, message_id: &str) -> Result<(), ConnError> {
        let f = Frame::new(commands::ACK).header("message-id", message_id);
        self.send_frame(f).await?;
        debug!(message_id, "acknowledged message");
        Ok(())
    }

    /// Begin a transaction and return its locally generated id.
    pub async fn begin(&self) -> Result<String, ConnError> {
        let (tx, transaction_id) = {
            let mut shared = self.shared.lock().await;
            let tx = shared.sender()?;
            (tx, shared.transactions.next_id())
        };
        let f = Frame::new(commands::BEGIN).header("transaction", transaction_id.as_str());
        self.write(&tx, f).await?;
        debug!(transaction = %transaction_id, "begin transaction");
        Ok(transaction_id)
    }

    /// Commit a transaction. Ids not produced by `begin` are still sent.
    pub async fn commit(&self, transaction_id: &str) -> Result<(), ConnError> {
        self.end_transaction(commands::COMMIT, transaction_id).await?;
        debug!(transaction = transaction_id, "commit transaction");
        Ok(())
    }

    /// Abort a transaction. Ids not produced by `begin` are still sent.
    pub async fn abort(&self, transaction_id: &str) -> Result<(), ConnError> {
        self.end_transaction(commands::ABORT, transaction_id).await?;
        debug!(transaction = transaction_id, "abort transaction");
        Ok(())
    }

    async fn end_transaction(&self, command: &str, transaction_id: &str) -> Result<(), ConnError> {
        let tx = {
            let shared = self.shared.lock().await;
            let tx = shared.sender()?;
            if !shared.transactions.was_issued(transaction_id) {
                debug!(
                    transaction = transaction_id,
                    command, "transaction was not begun on this connection"
                );
            }
            tx
        };
        let f = Frame::new(command).header("transaction", transaction_id);
        self.write(&tx, f).await
    }
}

/// Remove every `body` entry from `headers`, returning the last one as the
/// payload.
fn take_body(headers: &mut Vec<(String, String)>) -> Vec<u8> {
    let mut body = Vec::new();
    headers.retain(|(k, v)| {
        if k == "body" {
            body = v.clone().into_bytes();
            false
        } else {
            true
        }
    });
    body
}

/// Drive one transport until it closes. Returns true if it ended in error.
async fn run_session(
    stream: BoxedTransport,
    options: Arc<Options>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<Event>,
) -> bool {
    let mut framed = Framed::new(stream, StompCodec::new());

    let mut connect = Frame::new(commands::CONNECT);
    for (k, v) in options.connect_headers() {
        connect.set_header(k, v);
    }
    if let Some(login) = &options.login {
        debug!(login = %login, "attempting to login");
    }
    if let Err(e) = framed.send(connect).await {
        error!(error = %e, "failed to send CONNECT");
        let _ = events.send(Event::Error(e.into()));
        return true;
    }

    let (mut sink, mut stream) = framed.split();
    let idle = options.idle_timeout();
    let mut deadline = idle.map(|d| Instant::now() + d);
    let mut closing = false;

    loop {
        tokio::select! {
            maybe = outbound_rx.recv(), if !closing => {
                match maybe {
                    Some(Outbound::Frame(f)) => {
                        if options.debug {
                            debug!(command = %f.command, headers = f.headers.len(), "sending frame");
                        }
                        if let Err(e) = sink.send(f).await {
                            error!(error = %e, "write failed");
                            let _ = events.send(Event::Error(e.into()));
                            return true;
                        }
                        deadline = idle.map(|d| Instant::now() + d);
                    }
                    Some(Outbound::Close) | None => {
                        closing = true;
                        if let Err(e) = sink.close().await {
                            error!(error = %e, "failed to end transport");
                            let _ = events.send(Event::Error(e.into()));
                            return true;
                        }
                    }
                }
            }
            item = stream.next() => {
                match item {
                    Some(Ok(frame)) => {
                        deadline = idle.map(|d| Instant::now() + d);
                        dispatch(frame, &shared, &events, options.debug).await;
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "read failed");
                        let _ = events.send(Event::Error(e.into()));
                        return true;
                    }
                    None => {
                        debug!("transport ended");
                        return false;
                    }
                }
            }
            _ = idle_expired(deadline) => {
                if closing {
                    warn!("peer did not finish closing, releasing transport");
                    return false;
                }
                info!(timeout_ms = idle.map(|d| d.as_millis() as u64).unwrap_or(0), "idle timeout, disconnecting");
                {
                    let mut s = shared.lock().await;
                    if matches!(s.state, ConnectionState::Connecting | ConnectionState::Connected) {
                        s.state = ConnectionState::Disconnecting;
                    }
                }
                closing = true;
                deadline = idle.map(|d| Instant::now() + d);
                if let Err(e) = sink.close().await {
                    error!(error = %e, "failed to end transport");
                    let _ = events.send(Event::Error(e.into()));
                    return true;
                }
            }
        }
    }
}

async fn idle_expired(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => future::pending::<()>().await,
    }
}

/// Route one inbound frame by command.
async fn dispatch(
    frame: Frame,
    shared: &Mutex<Shared>,
    events: &mpsc::UnboundedSender<Event>,
    wire_debug: bool,
) {
    if wire_debug {
        debug!(command = %frame.command, headers = ?frame.headers, body = frame.body.len(), "frame received");
    }

    match frame.command.as_str() {
        commands::MESSAGE => {
            if frame.get_header("message-id").is_none() {
                debug!("MESSAGE without message-id ignored");
                return;
            }
            let callback = match frame.get_header("destination") {
                Some(dest) => shared.lock().await.subscriptions.route(dest),
                None => None,
            };
            match callback {
                Some(cb) => {
                    // A panicking callback must not take the I/O task down with it.
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| cb(&frame.body, &frame.headers)));
                    if let Err(payload) = outcome {
                        let reason = if let Some(s) = payload.downcast_ref::<&str>() {
                            (*s).to_string()
                        } else if let Some(s) = payload.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "unknown panic payload".to_string()
                        };
                        error!(
                            destination = frame.get_header("destination").unwrap_or(""),
                            reason = %reason,
                            "message callback panicked"
                        );
                    }
                }
                None => debug!(
                    destination = frame.get_header("destination").unwrap_or(""),
                    "no enabled subscription for message"
                ),
            }
            let _ = events.send(Event::Message(frame));
        }
        commands::CONNECTED => {
            let session = frame.get_header("session").map(String::from);
            let transitioned = {
                let mut s = shared.lock().await;
                if s.state == ConnectionState::Connecting {
                    s.session = session.clone();
                    s.state = ConnectionState::Connected;
                    true
                } else {
                    false
                }
            };
            if transitioned {
                info!(session = ?session, "connected to STOMP broker");
                let _ = events.send(Event::Connected { session });
            } else {
                debug!("CONNECTED outside of Connecting ignored");
            }
        }
        commands::RECEIPT => match frame.get_header("receipt-id") {
            Some(receipt_id) => {
                if !shared.lock().await.receipts.resolve(receipt_id) {
                    debug!(receipt = receipt_id, "RECEIPT for an id this connection did not request");
                }
                let _ = events.send(Event::Receipt(receipt_id.to_string()));
            }
            None => warn!("RECEIPT without receipt-id ignored"),
        },
        commands::ERROR => {
            let err = ServerError::from_frame(frame);
            warn!(message = %err.message, "broker sent ERROR frame");
            let _ = events.send(Event::Error(ConnError::Server(err)));
        }
        other => {
            warn!(command = %other, "unrecognized frame command, ignoring");
        }
    }
}

/// Release the transport state and publish the end of the connection.
async fn finish(shared: &Mutex<Shared>, events: &mpsc::UnboundedSender<Event>, had_error: bool) {
    {
        let mut s = shared.lock().await;
        s.state = ConnectionState::Disconnected;
        s.session = None;
        s.outbound_tx = None;
        s.receipts.release_pending();
        if s.debug_enabled() {
            debug!(had_error, receipts = s.receipts.tracked(), "transport released");
        }
    }
    info!("disconnected");
    let _ = events.send(Event::Disconnected);
    let _ = events.send(Event::Closed { had_error });
}
