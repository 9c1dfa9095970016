#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use meridian_core::{
    BincodeCodec, ControllerRef, DoneCallback, DynMessage, ErrorKind, Message, MethodDescriptor,
    PayloadCodec, RpcError, ServiceDescriptor,
};
use meridian_fabric::codec::{RpcCodec, RpcMessage};
use meridian_fabric::endpoint::Endpoint;
use meridian_fabric::error::Result;
use meridian_fabric::transport::{BoxTransport, Connector};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::Notify;

/// Any parseable endpoint; the duplex connector ignores it
pub const TARGET: &str = "127.0.0.1:7";

pub const SERVICE: &str = "test.EchoService";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EchoRequest {
    pub tag: u64,
    pub text: String,
}

impl Message for EchoRequest {
    const NAME: &'static str = "test.EchoRequest";
}

impl EchoRequest {
    pub fn new(tag: u64, text: impl Into<String>) -> Self {
        Self {
            tag,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EchoResponse {
    pub text: String,
}

impl Message for EchoResponse {
    const NAME: &'static str = "test.EchoResponse";
}

pub fn echo_descriptor() -> Arc<ServiceDescriptor> {
    ServiceDescriptor::builder(SERVICE)
        .method::<EchoRequest, EchoResponse>("Echo")
        .method::<EchoRequest, EchoResponse>("Shout")
        .build()
}

pub fn echo_method() -> Arc<MethodDescriptor> {
    Arc::clone(&echo_descriptor().methods()[0])
}

/// Fail the test if `future` takes longer than five seconds
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

/// Hands out in-memory streams; each `add_peer` allows one connect
#[derive(Default)]
pub struct DuplexConnector {
    streams: Mutex<VecDeque<DuplexStream>>,
}

impl DuplexConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_peer(&self) -> ScriptedPeer {
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.streams.lock().push_back(client);
        ScriptedPeer::new(server)
    }
}

#[async_trait::async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self, _endpoint: &Endpoint) -> Result<BoxTransport> {
        match self.streams.lock().pop_front() {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(io::Error::from(io::ErrorKind::ConnectionRefused).into()),
        }
    }
}

/// Duplex connector whose connects wait until `release` is called
#[derive(Default)]
pub struct GatedConnector {
    inner: DuplexConnector,
    gate: Notify,
}

impl GatedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_peer(&self) -> ScriptedPeer {
        self.inner.add_peer()
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait::async_trait]
impl Connector for GatedConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxTransport> {
        self.gate.notified().await;
        self.inner.connect(endpoint).await
    }
}

/// Remote side of a channel, driven step by step from the test
pub struct ScriptedPeer {
    stream: DuplexStream,
    buffer: BytesMut,
    codec: RpcCodec,
}

impl ScriptedPeer {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::new(),
            codec: RpcCodec::new(),
        }
    }

    pub async fn next_message(&mut self) -> RpcMessage {
        loop {
            if let Some(message) = self.codec.decode_frame(&mut self.buffer).unwrap() {
                return message;
            }
            let read = within(self.stream.read_buf(&mut self.buffer)).await.unwrap();
            assert!(read > 0, "channel closed the connection");
        }
    }

    pub async fn next_request(&mut self) -> (RpcMessage, EchoRequest) {
        let message = self.next_message().await;
        let request = BincodeCodec.decode(&message.payload).unwrap();
        (message, request)
    }

    /// Wait until the channel closes its end
    pub async fn closed(&mut self) {
        loop {
            match within(self.stream.read_buf(&mut self.buffer)).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    }

    /// Bytes read but not yet decoded
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub async fn send(&mut self, message: &RpcMessage) -> io::Result<()> {
        let mut frame = BytesMut::new();
        self.codec.serialize_to_buffer(message, &mut frame).unwrap();
        self.send_raw(&frame).await
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    pub async fn respond(&mut self, request: &RpcMessage, text: impl Into<String>) -> io::Result<()> {
        let payload = BincodeCodec
            .encode(&EchoResponse { text: text.into() })
            .unwrap();
        self.send(&RpcMessage::response(request.id, request.method.clone(), payload))
            .await
    }

    pub async fn fail(&mut self, request: &RpcMessage, error: &RpcError) -> io::Result<()> {
        self.send(&RpcMessage::error(request.id, request.method.clone(), error))
            .await
    }
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub tag: u64,
    pub response: Option<String>,
    pub error: Option<ErrorKind>,
    pub thread: Option<String>,
}

/// Collects call outcomes in completion order
#[derive(Clone, Default)]
pub struct Recorder {
    outcomes: Arc<Mutex<Vec<Outcome>>>,
}

impl Recorder {
    pub fn callback(&self, tag: u64) -> DoneCallback {
        let outcomes = Arc::clone(&self.outcomes);
        Box::new(move |controller: &ControllerRef, response: Option<DynMessage>| {
            let response = response
                .and_then(|message| message.downcast_ref::<EchoResponse>().map(|r| r.text.clone()));
            outcomes.lock().push(Outcome {
                tag,
                response,
                error: controller.error_kind(),
                thread: std::thread::current().name().map(str::to_owned),
            });
        })
    }

    pub fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().len()
    }

    pub async fn wait_for(&self, count: usize) -> Vec<Outcome> {
        within(async {
            loop {
                {
                    let outcomes = self.outcomes.lock();
                    if outcomes.len() >= count {
                        return outcomes.clone();
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
    }
}

/// Poll `condition` until it holds
pub async fn eventually(condition: impl Fn() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}
