//! Mock extraction gateways.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use scoretally::gateway::parse_extraction_response;
use scoretally::{ExtractedRecord, ExtractionGateway, GatewayError, ImageData};

/// What the scripted gateway does for one file name.
#[derive(Debug, Clone)]
pub enum Script {
    Records(Vec<ExtractedRecord>),
    /// Raw model text, run through the response parser.
    Raw(String),
    Fail(String),
    Sleep(Duration),
}

/// Returns canned results keyed by file name. Unknown names yield no records.
#[derive(Default)]
pub struct ScriptedGateway {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, file_name: &str, script: Script) -> Self {
        self.scripts.insert(file_name.to_string(), script);
        self
    }

    pub fn records(self, file_name: &str, records: Vec<ExtractedRecord>) -> Self {
        self.with(file_name, Script::Records(records))
    }

    pub fn fail(self, file_name: &str, message: &str) -> Self {
        self.with(file_name, Script::Fail(message.to_string()))
    }

    /// File names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtractionGateway for ScriptedGateway {
    async fn extract(&self, image: &ImageData) -> Result<Vec<ExtractedRecord>, GatewayError> {
        self.calls.lock().unwrap().push(image.file_name.clone());

        match self.scripts.get(&image.file_name) {
            Some(Script::Records(records)) => Ok(records.clone()),
            Some(Script::Raw(text)) => parse_extraction_response(text),
            Some(Script::Fail(message)) => Err(GatewayError::Transport(message.clone())),
            Some(Script::Sleep(duration)) => {
                tokio::time::sleep(*duration).await;
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }
}

/// Holds every call until [`BlockingGateway::release`] hands out a permit.
pub struct BlockingGateway {
    gate: Semaphore,
    started: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl BlockingGateway {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Lets `n` blocked calls return.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Polls until `started` and `in_flight` reach the given values.
    pub async fn wait_until(&self, started: usize, in_flight: usize) {
        let reached = tokio::time::timeout(Duration::from_secs(5), async {
            while self.started() != started || self.in_flight() != in_flight {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await;
        assert!(
            reached.is_ok(),
            "expected started={} in_flight={}, got started={} in_flight={}",
            started,
            in_flight,
            self.started(),
            self.in_flight()
        );
    }
}

impl Default for BlockingGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExtractionGateway for BlockingGateway {
    async fn extract(&self, image: &ImageData) -> Result<Vec<ExtractedRecord>, GatewayError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::SeqCst);

        let permit = self.gate.acquire().await.unwrap();
        permit.forget();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![ExtractedRecord::new(image.file_name.clone(), "", 1.0)])
    }
}
