//! CDP Transport Layer
//!
//! The tracker talks to a tab through [`DebuggerTransport`]. Hosts that
//! already own a debugger channel (an embedded browser, an extension
//! bridge) implement the trait themselves; [`WsTransport`] covers the
//! common case of a tab exposing a `webSocketDebuggerUrl`.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{Error, Result};

/// Capability contract for a remote-debugging channel to one tab
#[async_trait]
pub trait DebuggerTransport: Send + Sync + 'static {
    /// Open the channel
    async fn attach(&self) -> Result<()>;

    /// Close the channel
    async fn detach(&self) -> Result<()>;

    /// Whether the channel is currently open
    fn is_attached(&self) -> bool;

    /// Send a command and wait for its result object
    async fn send_raw(&self, method: &str, params: Value) -> Result<Value>;

    /// The tab is gone for good
    fn is_target_destroyed(&self) -> bool {
        false
    }

    /// The tab is mid-load and not ready for debugger attachment
    fn is_loading(&self) -> bool {
        false
    }
}

/// A parsed CDP message delivered to the event consumer
#[derive(Debug)]
pub enum CdpMessage {
    Event {
        method: String,
        params: Value,
        session_id: Option<String>,
    },
    /// The channel was closed by someone other than us
    Detached { reason: String },
}

/// A pending request waiting for a response, tagged with its method
type PendingRequest = (String, oneshot::Sender<Result<Value>>);
type PendingMap = Arc<Mutex<HashMap<u64, PendingRequest>>>;

/// Minimal RFC 6455 client framing
mod frame {
    use std::io::{self, Read};

    pub const OPCODE_CONTINUATION: u8 = 0x0;
    pub const OPCODE_TEXT: u8 = 0x1;
    pub const OPCODE_CLOSE: u8 = 0x8;
    pub const OPCODE_PING: u8 = 0x9;
    pub const OPCODE_PONG: u8 = 0xA;

    /// Encode a final, masked client frame
    pub fn encode(opcode: u8, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
        let len = payload.len();
        let mut out = Vec::with_capacity(14 + len);
        out.push(0x80 | opcode);

        match len {
            0..=125 => out.push(0x80 | len as u8),
            126..=65535 => {
                out.push(0x80 | 126);
                out.extend_from_slice(&(len as u16).to_be_bytes());
            }
            _ => {
                out.push(0x80 | 127);
                out.extend_from_slice(&(len as u64).to_be_bytes());
            }
        }

        out.extend_from_slice(&mask);
        out.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        out
    }

    /// A decoded frame
    pub struct Frame {
        pub fin: bool,
        pub opcode: u8,
        pub payload: Vec<u8>,
    }

    /// Read one frame, unmasking it if the peer masked it
    pub fn read<R: Read>(stream: &mut R) -> io::Result<Frame> {
        let mut header = [0u8; 2];
        stream.read_exact(&mut header)?;

        let fin = header[0] & 0x80 != 0;
        let opcode = header[0] & 0x0F;
        let masked = header[1] & 0x80 != 0;
        let len = match header[1] & 0x7F {
            126 => {
                let mut ext = [0u8; 2];
                stream.read_exact(&mut ext)?;
                u16::from_be_bytes(ext) as usize
            }
            127 => {
                let mut ext = [0u8; 8];
                stream.read_exact(&mut ext)?;
                u64::from_be_bytes(ext) as usize
            }
            n => n as usize,
        };

        let mask = if masked {
            let mut m = [0u8; 4];
            stream.read_exact(&mut m)?;
            Some(m)
        } else {
            None
        };

        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload)?;
        if let Some(mask) = mask {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }

        Ok(Frame {
            fin,
            opcode,
            payload,
        })
    }
}

/// Split `ws://host:port/path` into `(host:port, /path)`
fn split_ws_url(ws_url: &str) -> Result<(String, String)> {
    let rest = ws_url
        .strip_prefix("ws://")
        .ok_or_else(|| Error::transport(format!("Unsupported debugger URL: {}", ws_url)))?;
    let (host_port, path) = rest.split_once('/').unwrap_or((rest, ""));
    if host_port.is_empty() {
        return Err(Error::transport(format!("Missing host in {}", ws_url)));
    }
    Ok((host_port.to_string(), format!("/{}", path)))
}

/// Write half of a socket, shared by command senders and the reader's pongs
type SharedWriter = Arc<Mutex<TcpStream>>;

/// One open socket; replaced wholesale on every attach
struct Socket {
    writer: SharedWriter,
    /// Set before a local detach so the reader does not report it as external
    closing: Arc<AtomicBool>,
}

impl Socket {
    async fn write(&self, opcode: u8, payload: &[u8]) -> std::io::Result<()> {
        let data = frame::encode(opcode, payload, rand::random());
        let mut writer = self.writer.lock().await;
        writer.write_all(&data)?;
        writer.flush()
    }
}

/// WebSocket transport to a single tab's debugger endpoint
pub struct WsTransport {
    ws_url: String,
    socket: Mutex<Option<Arc<Socket>>>,
    attached: Arc<AtomicBool>,
    next_id: AtomicU64,
    pending: PendingMap,
    event_tx: mpsc::Sender<CdpMessage>,
}

impl WsTransport {
    /// Create a detached transport for `ws_url` and the receiving end of
    /// its event feed
    pub fn new(ws_url: impl Into<String>) -> (Self, mpsc::Receiver<CdpMessage>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let transport = Self {
            ws_url: ws_url.into(),
            socket: Mutex::new(None),
            attached: Arc::new(AtomicBool::new(false)),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
        };
        (transport, event_rx)
    }

    /// The debugger URL this transport connects to
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    fn connect(&self) -> Result<TcpStream> {
        let (host_port, path) = split_ws_url(&self.ws_url)?;

        let mut stream = TcpStream::connect(&host_port)
            .map_err(|e| Error::transport_io("Failed to connect to debugger", e))?;

        let key = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            rand::random::<[u8; 16]>(),
        );
        let handshake = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n",
            path, host_port, key
        );
        stream
            .write_all(handshake.as_bytes())
            .map_err(|e| Error::transport_io("Handshake write failed", e))?;

        // Read byte-wise up to the blank line so no frame bytes are swallowed
        let mut response = Vec::with_capacity(256);
        let mut byte = [0u8; 1];
        while !response.ends_with(b"\r\n\r\n") {
            stream
                .read_exact(&mut byte)
                .map_err(|e| Error::transport_io("Handshake read failed", e))?;
            response.push(byte[0]);
            if response.len() > 8192 {
                return Err(Error::transport("Handshake response too large"));
            }
        }
        let status_line = String::from_utf8_lossy(&response);
        if !status_line.starts_with("HTTP/1.1 101") {
            return Err(Error::transport(format!(
                "WebSocket handshake failed: {}",
                status_line.lines().next().unwrap_or_default()
            )));
        }

        tracing::debug!("WebSocket connected to {}", self.ws_url);
        Ok(stream)
    }

    /// Reader loop - runs on its own thread for the lifetime of one socket
    fn reader_loop(
        mut stream: TcpStream,
        writer: SharedWriter,
        pending: PendingMap,
        event_tx: mpsc::Sender<CdpMessage>,
        attached: Arc<AtomicBool>,
        closing: Arc<AtomicBool>,
    ) {
        let mut message: Vec<u8> = Vec::new();
        let reason = loop {
            let frame = match frame::read(&mut stream) {
                Ok(frame) => frame,
                Err(e) => break format!("connection lost: {}", e),
            };

            match frame.opcode {
                frame::OPCODE_TEXT | frame::OPCODE_CONTINUATION => {
                    message.extend_from_slice(&frame.payload);
                    if !frame.fin {
                        continue;
                    }
                    let text = std::mem::take(&mut message);
                    Self::dispatch(&text, &pending, &event_tx);
                }
                frame::OPCODE_PING => {
                    let pong = frame::encode(frame::OPCODE_PONG, &frame.payload, rand::random());
                    if let Err(e) = writer.blocking_lock().write_all(&pong) {
                        tracing::debug!("Pong write failed: {}", e);
                    }
                }
                frame::OPCODE_CLOSE => break "closed by remote".to_string(),
                _ => {}
            }
        };

        attached.store(false, Ordering::SeqCst);

        // Nobody will answer these now
        let orphaned: Vec<_> = pending.blocking_lock().drain().collect();
        for (_, (method, sender)) in orphaned {
            let _ = sender.send(Err(Error::transport(format!(
                "Connection closed while waiting for {}",
                method
            ))));
        }

        if closing.load(Ordering::SeqCst) {
            tracing::debug!("CDP reader loop ended after local detach");
        } else {
            tracing::debug!("CDP reader loop ended: {}", reason);
            let _ = event_tx.blocking_send(CdpMessage::Detached { reason });
        }
    }

    fn dispatch(raw: &[u8], pending: &PendingMap, event_tx: &mpsc::Sender<CdpMessage>) {
        let msg: Value = match serde_json::from_slice(raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Failed to parse CDP message: {}", e);
                return;
            }
        };

        if let Some(id) = msg.get("id").and_then(|v| v.as_u64()) {
            let Some((method, sender)) = pending.blocking_lock().remove(&id) else {
                tracing::trace!("Response for unknown id: {}", id);
                return;
            };
            let result = match msg.get("error") {
                Some(error) => Err(Error::cdp(
                    method,
                    error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1),
                    error
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("unknown"),
                )),
                None => Ok(msg.get("result").cloned().unwrap_or(json!({}))),
            };
            let _ = sender.send(result);
        } else if let Some(method) = msg.get("method").and_then(|m| m.as_str()) {
            let _ = event_tx.blocking_send(CdpMessage::Event {
                method: method.to_string(),
                params: msg.get("params").cloned().unwrap_or(json!({})),
                session_id: msg
                    .get("sessionId")
                    .and_then(|s| s.as_str())
                    .map(String::from),
            });
        }
    }
}

#[async_trait]
impl DebuggerTransport for WsTransport {
    async fn attach(&self) -> Result<()> {
        let mut slot = self.socket.lock().await;
        if slot.is_some() && self.attached.load(Ordering::SeqCst) {
            return Ok(());
        }

        let stream = self.connect()?;
        let reader = stream
            .try_clone()
            .map_err(|e| Error::transport_io("Failed to clone stream", e))?;

        let writer: SharedWriter = Arc::new(Mutex::new(stream));
        let reader_writer = Arc::clone(&writer);
        let closing = Arc::new(AtomicBool::new(false));
        let pending = Arc::clone(&self.pending);
        let event_tx = self.event_tx.clone();
        let attached = Arc::clone(&self.attached);
        let reader_closing = Arc::clone(&closing);
        std::thread::spawn(move || {
            Self::reader_loop(
                reader,
                reader_writer,
                pending,
                event_tx,
                attached,
                reader_closing,
            );
        });

        self.attached.store(true, Ordering::SeqCst);
        *slot = Some(Arc::new(Socket {
            writer,
            closing,
        }));
        Ok(())
    }

    async fn detach(&self) -> Result<()> {
        let Some(socket) = self.socket.lock().await.take() else {
            return Ok(());
        };
        socket.closing.store(true, Ordering::SeqCst);
        self.attached.store(false, Ordering::SeqCst);

        let _ = socket.write(frame::OPCODE_CLOSE, &[]).await;
        let writer = socket.writer.lock().await;
        let _ = writer.shutdown(Shutdown::Both);
        tracing::debug!("Detached from {}", self.ws_url);
        Ok(())
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    async fn send_raw(&self, method: &str, params: Value) -> Result<Value> {
        let socket = self
            .socket
            .lock()
            .await
            .clone()
            .ok_or(Error::NotAttached)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(id, (method.to_string(), tx));

        let data = serde_json::to_string(&json!({
            "id": id,
            "method": method,
            "params": params,
        }))?;

        if let Err(e) = socket.write(frame::OPCODE_TEXT, data.as_bytes()).await {
            self.pending.lock().await.remove(&id);
            return Err(Error::transport_io("WebSocket write failed", e));
        }
        tracing::trace!("Sent CDP command: {} (id={})", method, id);

        rx.await
            .map_err(|_| Error::transport("Response channel closed"))?
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Ok(slot) = self.socket.try_lock() {
            if let Some(socket) = slot.as_ref() {
                socket.closing.store(true, Ordering::SeqCst);
                if let Ok(writer) = socket.writer.try_lock() {
                    let _ = writer.shutdown(Shutdown::Both);
                }
            }
        }
    }
}
