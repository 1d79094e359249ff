//! Scripted transport used by controller tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};

use super::transport::{
    StreamEvent, Subscription, SubscriptionHandle, Transport, TransportClient, TransportError,
};

/// Handle that only counts how often it was asked to unsubscribe.
pub(crate) struct CountingHandle {
    calls: Arc<AtomicUsize>,
}

impl SubscriptionHandle for CountingHandle {
    fn unsubscribe(&mut self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn counting_handle() -> (Box<dyn SubscriptionHandle>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    (
        Box::new(CountingHandle {
            calls: Arc::clone(&calls),
        }),
        calls,
    )
}

pub(crate) struct FakeStream {
    pub topics: Vec<String>,
    pub sender: mpsc::Sender<StreamEvent>,
    pub unsubscribes: Arc<AtomicUsize>,
}

#[derive(Default)]
struct FakeState {
    connects: Vec<(String, String)>,
    fail_next: Option<TransportError>,
    streams: Vec<FakeStream>,
}

/// In-memory transport; every successful subscribe records a [`FakeStream`] the test
/// can push events into.
pub(crate) struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
    held: AtomicBool,
    gate: Semaphore,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::default(),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
        })
    }

    pub fn fail_next_connect(&self, error: TransportError) {
        self.state.lock().unwrap().fail_next = Some(error);
    }

    /// Connects started after this call block until released.
    pub fn hold_connects(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release_connects(&self, count: usize) {
        self.gate.add_permits(count);
    }

    pub fn connects(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().unwrap().streams.len()
    }

    pub fn sender(&self, index: usize) -> mpsc::Sender<StreamEvent> {
        self.state.lock().unwrap().streams[index].sender.clone()
    }

    pub fn sender_for_topic(&self, topic: &str) -> mpsc::Sender<StreamEvent> {
        self.stream_for_topic(topic, |stream| stream.sender.clone())
    }

    pub fn unsubscribes(&self, index: usize) -> usize {
        self.state.lock().unwrap().streams[index]
            .unsubscribes
            .load(Ordering::SeqCst)
    }

    pub fn unsubscribes_for_topic(&self, topic: &str) -> usize {
        self.stream_for_topic(topic, |stream| stream.unsubscribes.load(Ordering::SeqCst))
    }

    fn stream_for_topic<T>(&self, topic: &str, f: impl FnOnce(&FakeStream) -> T) -> T {
        let state = self.state.lock().unwrap();
        let stream = state
            .streams
            .iter()
            .find(|stream| stream.topics.iter().any(|t| t == topic))
            .unwrap_or_else(|| panic!("no subscription for topic {}", topic));
        f(stream)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        region: &str,
        endpoint: &str,
    ) -> Result<Box<dyn TransportClient>, TransportError> {
        if self.held.load(Ordering::SeqCst) {
            self.gate
                .acquire()
                .await
                .map_err(|e| TransportError::Client(e.to_string()))?
                .forget();
        }

        let mut state = self.state.lock().unwrap();
        state.connects.push((region.to_string(), endpoint.to_string()));
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        Ok(Box::new(FakeClient {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeClient {
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl TransportClient for FakeClient {
    async fn subscribe(&mut self, topics: Vec<String>) -> Result<Subscription, TransportError> {
        let (sender, events) = mpsc::channel(16);
        let (handle, unsubscribes) = counting_handle();
        self.state.lock().unwrap().streams.push(FakeStream {
            topics,
            sender,
            unsubscribes,
        });
        Ok(Subscription { handle, events })
    }
}
