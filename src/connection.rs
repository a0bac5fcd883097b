use crate::codec::{CodecKind, HubCodec};
use crate::config::HubConfig;
use crate::error::{HubError, Result};
use crate::protocol::{Frame, HubEvent, Join};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::codec::{Encoder, FramedRead};

/// Join the legacy greeting is sent on
const GREETING_JOIN: u16 = 1;

/// Hub link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Running connection task and the handle used to stop it
struct LinkTask {
    stop_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Everything the connection task needs, cloned out of the [`Transport`]
struct LinkContext {
    addr: String,
    codec: CodecKind,
    reconnect_delay: Duration,
    greeting: Option<Bytes>,
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<Bytes>>>>,
    state_tx: Arc<watch::Sender<LinkState>>,
    inbound: mpsc::UnboundedSender<Frame>,
}

/// Owns the single TCP connection to the processor
///
/// Once started, the transport keeps the socket up: whenever the connection
/// fails or the hub closes it, it waits out the reconnect delay and dials
/// again. Decoded frames are forwarded in arrival order; malformed frames are
/// logged and dropped without closing the socket.
pub struct Transport {
    addr: String,
    codec: CodecKind,
    reconnect_delay: Duration,
    greeting: Option<String>,
    /// Writer side of the live connection; `None` while disconnected
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<Bytes>>>>,
    state_tx: Arc<watch::Sender<LinkState>>,
    task: Mutex<Option<LinkTask>>,
}

impl Transport {
    /// Create a stopped transport
    pub fn new(addr: impl Into<String>, codec: CodecKind, reconnect_delay: Duration) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            addr: addr.into(),
            codec,
            reconnect_delay,
            greeting: None,
            outbound: Arc::new(Mutex::new(None)),
            state_tx: Arc::new(state_tx),
            task: Mutex::new(None),
        }
    }

    pub fn from_config(config: &HubConfig) -> Self {
        let mut transport = Self::new(config.socket_addr(), config.codec, config.reconnect_delay());
        transport.greeting = config.greeting.clone();
        transport
    }

    /// Send `greeting` after every successful connect
    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Watch link state transitions
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    fn greeting_bytes(&self) -> Result<Option<Bytes>> {
        let Some(greeting) = &self.greeting else {
            return Ok(None);
        };
        if self.codec != CodecKind::LegacyJoins {
            tracing::debug!("Greeting only applies to the legacy join codec, not sending it");
            return Ok(None);
        }
        let frame = Frame::Join(Join::Serial {
            join: GREETING_JOIN,
            value: greeting.clone(),
        });
        Ok(Some(encode_frame(self.codec, frame)?))
    }

    /// Start connecting; frames received from the hub are pushed to `inbound`
    ///
    /// If the transport is already running, it is stopped and restarted.
    pub async fn start(&self, inbound: mpsc::UnboundedSender<Frame>) -> Result<()> {
        self.stop().await;

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let context = LinkContext {
            addr: self.addr.clone(),
            codec: self.codec,
            reconnect_delay: self.reconnect_delay,
            greeting: self.greeting_bytes()?,
            outbound: self.outbound.clone(),
            state_tx: self.state_tx.clone(),
            inbound,
        };

        let handle = tokio::spawn(run_link(context, stop_rx));
        *self.task.lock().await = Some(LinkTask { stop_tx, handle });
        Ok(())
    }

    /// Close the connection and cancel any pending reconnect
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        let _ = task.stop_tx.send(());
        let mut handle = task.handle;
        if tokio::time::timeout(Duration::from_millis(500), &mut handle)
            .await
            .is_err()
        {
            tracing::warn!("Hub link task did not stop in time, aborting");
            handle.abort();
        }
        self.outbound.lock().await.take();
        self.state_tx.send_replace(LinkState::Disconnected);
    }

    /// Encode and queue a frame for the hub
    ///
    /// Delivery is best-effort: while disconnected this fails with
    /// [`HubError::NotConnected`] and the frame is dropped.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        let bytes = encode_frame(self.codec, frame)?;
        let outbound = self.outbound.lock().await;
        let tx = outbound.as_ref().ok_or(HubError::NotConnected)?;
        tx.send(bytes).map_err(|_| HubError::NotConnected)
    }

    /// Encode and queue a domain event for the hub
    pub async fn send_event(&self, event: HubEvent) -> Result<()> {
        tracing::debug!("Sending: {:?}", event);
        self.send(Frame::Event(event)).await
    }
}

#[cfg(test)]
impl Transport {
    /// Stand in for a live session; encoded frames land on the returned receiver
    pub(crate) async fn attach(&self) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound.lock().await = Some(tx);
        self.state_tx.send_replace(LinkState::Connected);
        rx
    }

    /// End a session started with [`Transport::attach`]
    pub(crate) async fn detach(&self) {
        self.outbound.lock().await.take();
        self.state_tx.send_replace(LinkState::Disconnected);
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.handle.abort();
        }
    }
}

fn encode_frame(codec: CodecKind, frame: Frame) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    HubCodec::new(codec).encode(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Connect, run the session, back off, repeat until stopped
async fn run_link(context: LinkContext, mut stop_rx: broadcast::Receiver<()>) {
    loop {
        context.state_tx.send_replace(LinkState::Connecting);
        tracing::info!("Connecting to hub at {}", context.addr);

        let connected = tokio::select! {
            _ = stop_rx.recv() => break,
            result = TcpStream::connect(&context.addr) => result,
        };

        match connected {
            Ok(stream) => {
                tracing::info!("Hub connected");
                let result = tokio::select! {
                    _ = stop_rx.recv() => break,
                    result = run_session(&context, stream) => result,
                };
                match result {
                    Ok(()) => tracing::info!("Hub connection closed"),
                    Err(e) => tracing::warn!("{}", HubError::ConnectionLost(e.to_string())),
                }
            }
            Err(e) => tracing::error!("Failed to connect to {}: {}", context.addr, e),
        }

        context.outbound.lock().await.take();
        context.state_tx.send_replace(LinkState::Disconnected);

        tracing::info!("Reconnecting to hub in {:?}", context.reconnect_delay);
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = sleep(context.reconnect_delay) => {}
        }
    }

    context.outbound.lock().await.take();
    context.state_tx.send_replace(LinkState::Disconnected);
    tracing::info!("Hub link stopped");
}

/// Pump one connected socket until it closes or fails
async fn run_session(context: &LinkContext, stream: TcpStream) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = FramedRead::new(read, HubCodec::new(context.codec));

    if let Some(greeting) = &context.greeting {
        write.write_all(greeting).await?;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    *context.outbound.lock().await = Some(tx);
    context.state_tx.send_replace(LinkState::Connected);

    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(Frame::Malformed(reason))) => {
                    tracing::warn!("{}", HubError::MalformedFrame(reason));
                }
                Some(Ok(frame)) => {
                    tracing::debug!("Received: {:?}", frame);
                    if context.inbound.send(frame).is_err() {
                        tracing::debug!("Inbound receiver dropped, closing session");
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            },
            Some(bytes) = rx.recv() => {
                write.write_all(&bytes).await?;
            }
        }
    }
}
