use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::errors::{ClipError, Result};
use crate::ranking::RankingIndex;
use crate::scoring::normalize;
use crate::storage::models::Item;
use crate::storage::writer::Snapshot;

pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Idle,
    Computing(RequestId),
    /// Inputs changed and no request has been issued for them yet.
    Stale,
}

struct RankRequest {
    id: RequestId,
    items: Snapshot,
    query: String,
}

struct RankResponse {
    id: RequestId,
    results: Vec<Item>,
}

pub struct QueryCoordinator {
    requests: Option<Sender<RankRequest>>,
    responses: Receiver<RankResponse>,
    worker: Option<JoinHandle<()>>,
    latest: RequestId,
    phase: QueryPhase,
    published: Vec<Item>,
    published_for: RequestId,
}

impl QueryCoordinator {
    pub fn spawn(index: RankingIndex) -> Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<RankRequest>();
        let (response_tx, response_rx) = mpsc::channel::<RankResponse>();

        let worker = thread::Builder::new()
            .name("clipstack-rank".into())
            .spawn(move || rank_loop(index, request_rx, response_tx))
            .map_err(|e| ClipError::Worker(format!("failed to start ranking thread: {e}")))?;

        Ok(Self {
            requests: Some(request_tx),
            responses: response_rx,
            worker: Some(worker),
            latest: 0,
            phase: QueryPhase::Idle,
            published: Vec::new(),
            published_for: 0,
        })
    }

    pub fn phase(&self) -> QueryPhase {
        self.phase
    }

    pub fn published_request(&self) -> RequestId {
        self.published_for
    }

    pub fn displayed(&self) -> &[Item] {
        &self.published
    }

    pub fn invalidate(&mut self) {
        if self.phase == QueryPhase::Idle {
            self.phase = QueryPhase::Stale;
        }
    }

    pub fn refresh(&mut self, items: Snapshot, query: &str) -> RequestId {
        self.latest += 1;
        let id = self.latest;

        if normalize(query).is_empty() {
            self.publish(id, items.to_vec());
            return id;
        }

        let request = RankRequest {
            id,
            items,
            query: query.to_string(),
        };
        let sent = self
            .requests
            .as_ref()
            .map(|tx| tx.send(request).is_ok())
            .unwrap_or(false);
        if sent {
            self.phase = QueryPhase::Computing(id);
        } else {
            error!(request = id, "ranking thread is gone, results not refreshed");
            self.phase = QueryPhase::Stale;
        }
        id
    }

    /// Apply every result that has arrived. Returns true if the published
    /// list changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        loop {
            match self.responses.try_recv() {
                Ok(response) => changed |= self.accept(response),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.worker_lost();
                    break;
                }
            }
        }
        changed
    }

    /// Block until the latest request is published or `timeout` elapses.
    /// Returns true if the published results are current.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll();
            if !matches!(self.phase, QueryPhase::Computing(_)) {
                return self.phase == QueryPhase::Idle;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.responses.recv_timeout(remaining) {
                Ok(response) => {
                    self.accept(response);
                }
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => {
                    self.worker_lost();
                    return false;
                }
            }
        }
    }

    fn accept(&mut self, response: RankResponse) -> bool {
        if response.id != self.latest {
            debug!(
                request = response.id,
                latest = self.latest,
                "discarding superseded ranking result"
            );
            return false;
        }
        self.publish(response.id, response.results);
        true
    }

    fn publish(&mut self, id: RequestId, results: Vec<Item>) {
        self.published = results;
        self.published_for = id;
        self.phase = QueryPhase::Idle;
    }

    fn worker_lost(&mut self) {
        if let QueryPhase::Computing(id) = self.phase {
            warn!(request = id, "ranking thread stopped before answering");
            self.phase = QueryPhase::Stale;
        }
    }
}

impl Drop for QueryCoordinator {
    fn drop(&mut self) {
        self.requests.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("ranking thread panicked");
        }
    }
}

fn rank_loop(
    mut index: RankingIndex,
    requests: Receiver<RankRequest>,
    responses: Sender<RankResponse>,
) {
    while let Ok(request) = requests.recv() {
        let results = index.rank(&request.items, &request.query);
        let response = RankResponse {
            id: request.id,
            results,
        };
        if responses.send(response).is_err() {
            break;
        }
    }
}
