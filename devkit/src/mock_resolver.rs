/*!
Mock content resolver

Stands in for the content server. Resolve results are scripted (a queue of
one-shot results in front of a standing fallback), heartbeat acks are
queued, and every call is recorded for assertions.
*/

use async_trait::async_trait;
use signage_player::{
    CommandReport, ContentResolver, DeviceStatus, HeartbeatAck, ResolveError, ResolvedContent,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One observable interaction with a double
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Resolve,
    Heartbeat,
    Ack(String),
    Reboot,
    Reset,
    Screenshot,
}

/// Ordered record of calls, shareable between doubles
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    /// Index of the first occurrence of `call`
    pub fn position(&self, call: &Call) -> Option<usize> {
        self.calls.lock().unwrap().iter().position(|c| c == call)
    }
}

struct ResolverState {
    scripted: VecDeque<Result<ResolvedContent, ResolveError>>,
    fallback: Result<ResolvedContent, ResolveError>,
    latency: Duration,
    acks: VecDeque<HeartbeatAck>,
    heartbeat_error: Option<ResolveError>,
    heartbeats: Vec<DeviceStatus>,
    reports: Vec<CommandReport>,
    resolve_calls: usize,
    in_flight: usize,
    max_in_flight: usize,
}

fn unreachable_error() -> ResolveError {
    ResolveError::Network("mock server unreachable".to_string())
}

/// Scriptable `ContentResolver`
#[derive(Clone)]
pub struct MockResolver {
    state: Arc<Mutex<ResolverState>>,
    log: CallLog,
}

impl MockResolver {
    /// Starts unreachable until told to serve something.
    pub fn new() -> Self {
        Self::with_log(CallLog::new())
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            state: Arc::new(Mutex::new(ResolverState {
                scripted: VecDeque::new(),
                fallback: Err(unreachable_error()),
                latency: Duration::ZERO,
                acks: VecDeque::new(),
                heartbeat_error: None,
                heartbeats: Vec::new(),
                reports: Vec::new(),
                resolve_calls: 0,
                in_flight: 0,
                max_in_flight: 0,
            })),
            log,
        }
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// Answer every unscripted resolve with `content`.
    pub fn serve(&self, content: ResolvedContent) {
        self.state.lock().unwrap().fallback = Ok(content);
        log::info!("[MOCK] serving content");
    }

    /// Fail every unscripted resolve with a network error.
    pub fn go_offline(&self) {
        self.fail_with(unreachable_error());
    }

    pub fn fail_with(&self, error: ResolveError) {
        log::info!("[MOCK] resolver failing with: {}", error);
        self.state.lock().unwrap().fallback = Err(error);
    }

    /// Queue a one-shot result ahead of the fallback.
    pub fn push_result(&self, result: Result<ResolvedContent, ResolveError>) {
        self.state.lock().unwrap().scripted.push_back(result);
    }

    pub fn push_content(&self, content: ResolvedContent) {
        self.push_result(Ok(content));
    }

    pub fn push_failure(&self) {
        self.push_result(Err(unreachable_error()));
    }

    /// Delay every resolve answer by `latency` (the answer itself is fixed
    /// when the call starts).
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = latency;
    }

    pub fn queue_ack(&self, ack: HeartbeatAck) {
        self.state.lock().unwrap().acks.push_back(ack);
    }

    pub fn fail_heartbeats(&self, error: Option<ResolveError>) {
        self.state.lock().unwrap().heartbeat_error = error;
    }

    pub fn resolve_calls(&self) -> usize {
        self.state.lock().unwrap().resolve_calls
    }

    /// Most resolve calls ever in progress at the same time
    pub fn max_concurrent_resolves(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    pub fn heartbeats(&self) -> Vec<DeviceStatus> {
        self.state.lock().unwrap().heartbeats.clone()
    }

    pub fn reports(&self) -> Vec<CommandReport> {
        self.state.lock().unwrap().reports.clone()
    }
}

impl Default for MockResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Ends an in-flight resolve, including one cancelled mid-latency
struct InFlight<'a>(&'a Mutex<ResolverState>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap().in_flight -= 1;
    }
}

#[async_trait]
impl ContentResolver for MockResolver {
    async fn resolve_content(&self, device_id: &str) -> Result<ResolvedContent, ResolveError> {
        let (result, latency) = {
            let mut state = self.state.lock().unwrap();
            state.resolve_calls += 1;
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            let result = match state.scripted.pop_front() {
                Some(result) => result,
                None => state.fallback.clone(),
            };
            (result, state.latency)
        };
        self.log.record(Call::Resolve);
        log::debug!("[MOCK] resolve for {} -> ok={}", device_id, result.is_ok());

        let _in_flight = InFlight(&self.state);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        result
    }

    async fn send_heartbeat(&self, status: &DeviceStatus) -> Result<HeartbeatAck, ResolveError> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.heartbeats.push(status.clone());
            match &state.heartbeat_error {
                Some(error) => Err(error.clone()),
                None => Ok(state.acks.pop_front().unwrap_or_default()),
            }
        };
        self.log.record(Call::Heartbeat);
        result
    }

    async fn acknowledge_command(
        &self,
        _device_id: &str,
        report: &CommandReport,
    ) -> Result<(), ResolveError> {
        self.state.lock().unwrap().reports.push(report.clone());
        self.log.record(Call::Ack(report.command_id.clone()));
        log::info!("[MOCK] command {} acknowledged as {:?}", report.command_id, report.status);
        Ok(())
    }
}
