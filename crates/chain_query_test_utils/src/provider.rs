use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use alloy_primitives::B256;
use chain_query::{Payload, Provider, ProviderError, TransactionHandle};
use chain_query_key::CallDescriptor;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Semaphore;

type Responder = Box<dyn Fn(&CallDescriptor, usize) -> Result<Payload, ProviderError> + Send + Sync>;
type Sender =
    Box<dyn Fn(&CallDescriptor, usize) -> Result<TransactionHandle, ProviderError> + Send + Sync>;

/// A provider with scripted responses that records the calls it receives.
///
/// Responders receive the zero-based index of the call.
pub struct MockProvider {
    responder: Responder,
    sender: Sender,
    calls: AtomicUsize,
    sends: AtomicUsize,
    received: Mutex<Vec<CallDescriptor>>,
    gate: Option<Gate>,
}

impl MockProvider {
    /// Constructs a provider that answers read calls with `responder`.
    pub fn new(
        responder: impl Fn(&CallDescriptor, usize) -> Result<Payload, ProviderError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            sender: Box::new(|descriptor, index| {
                Ok(TransactionHandle {
                    hash: B256::with_last_byte(u8::try_from(index % 256).unwrap_or_default()),
                    chain_id: descriptor.chain_id(),
                })
            }),
            calls: AtomicUsize::new(0),
            sends: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Constructs a provider that answers every read call with `value`.
    pub fn returning(value: Payload) -> Self {
        Self::new(move |_, _| Ok(value.clone()))
    }

    /// Constructs a provider that answers the n-th read call with n, starting
    /// at one.
    pub fn counting() -> Self {
        Self::new(|_, index| Ok(json!(index + 1)))
    }

    /// Answers state-changing calls with `sender`.
    #[must_use]
    pub fn with_sender(
        mut self,
        sender: impl Fn(&CallDescriptor, usize) -> Result<TransactionHandle, ProviderError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.sender = Box::new(sender);
        self
    }

    /// Holds every read call until the returned gate lets it pass.
    #[must_use]
    pub fn gated(mut self) -> (Self, Gate) {
        let gate = Gate::new();
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Returns the number of read calls received so far, including held
    /// ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the number of state-changing calls received so far.
    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    /// Returns the descriptors of all read calls received so far.
    pub fn received(&self) -> Vec<CallDescriptor> {
        self.received.lock().clone()
    }
}

impl Provider for MockProvider {
    async fn call(&self, descriptor: &CallDescriptor) -> Result<Payload, ProviderError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().push(descriptor.clone());

        if let Some(gate) = &self.gate {
            gate.pass().await;
        }

        (self.responder)(descriptor, index)
    }

    async fn send(&self, descriptor: &CallDescriptor) -> Result<TransactionHandle, ProviderError> {
        let index = self.sends.fetch_add(1, Ordering::SeqCst);
        (self.sender)(descriptor, index)
    }
}

/// Holds calls of a gated [`MockProvider`] in flight.
#[derive(Clone, Debug)]
pub struct Gate {
    semaphore: Arc<Semaphore>,
}

impl Gate {
    fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(0)),
        }
    }

    /// Lets the provided number of held calls pass.
    pub fn release(&self, calls: usize) {
        self.semaphore.add_permits(calls);
    }

    /// Lets all current and future calls pass.
    pub fn open(&self) {
        self.semaphore.close();
    }

    async fn pass(&self) {
        match self.semaphore.acquire().await {
            Ok(permit) => permit.forget(),
            // A closed gate lets every call pass.
            Err(_closed) => (),
        }
    }
}
