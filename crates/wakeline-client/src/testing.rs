use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{Transport, TransportError, WireRequest, WireResponse};

#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(u16, &'static str),
    Fail(TransportError),
    /// Never answers; the caller's timeout has to fire.
    Hang,
}

/// Replays a queue of canned results, then repeats the fallback forever.
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    calls: Mutex<Vec<WireRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Scripted>, fallback: Scripted) -> Self {
        Self {
            queue: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn offline() -> Self {
        Self::new(Vec::new(), refused())
    }

    pub fn calls(&self) -> Vec<WireRequest> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

pub fn refused() -> Scripted {
    Scripted::Fail(TransportError::Connect("connection refused".to_string()))
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        self.calls.lock().expect("calls lock").push(request);
        let next = self
            .queue
            .lock()
            .expect("queue lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match next {
            Scripted::Respond(status, body) => Ok(WireResponse {
                status,
                body: body.to_string(),
            }),
            Scripted::Fail(err) => Err(err),
            Scripted::Hang => std::future::pending().await,
        }
    }
}
