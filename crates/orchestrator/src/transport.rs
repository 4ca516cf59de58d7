//! Point-based exchange with the particle process
//!
//! Values travel as named scalars attached to a 3-D point and a time frame.
//! A side announces the frames and region it will send and receive, pushes
//! values, commits a frame to publish it, and forgets a frame once it has
//! read everything it needs from it.
//!
//! [`InMemoryTransport`] connects two endpoints inside one process. It is
//! what the tests and local runs use in place of a real particle solver.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kernel::Real;

use crate::error::OrchestratorResult;

/// Axis-aligned region of space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    /// Lower corner.
    pub min: [Real; 3],
    /// Upper corner.
    pub max: [Real; 3],
}

impl Region {
    /// Whether `p` lies inside, bounds included.
    pub fn contains(&self, p: [Real; 3]) -> bool {
        (0..3).all(|a| p[a] >= self.min[a] && p[a] <= self.max[a])
    }
}

/// Exchange primitives offered by a particle transport.
pub trait ParticleTransport: Send + std::fmt::Debug {
    /// Announce the frames and region this side will push to.
    fn announce_send_span(&mut self, frames: Range<u64>, region: Region) -> OrchestratorResult<()>;

    /// Announce the frames and region this side will fetch from.
    fn announce_recv_span(&mut self, frames: Range<u64>, region: Region) -> OrchestratorResult<()>;

    /// Every committed point of `frame` inside `region` carrying `key`, with
    /// its value.
    fn fetch_points(&mut self, key: &str, frame: u64, region: &Region) -> OrchestratorResult<Vec<([Real; 3], Real)>>;

    /// Value of `key` at `point` in committed `frame`, if any.
    fn fetch(&mut self, key: &str, frame: u64, point: [Real; 3]) -> OrchestratorResult<Option<Real>>;

    /// Frame-wide value of `key`, if any.
    fn fetch_global(&mut self, key: &str, frame: u64) -> OrchestratorResult<Option<Real>>;

    /// Stage `value` for `key` at `point` in `frame`.
    fn push(&mut self, key: &str, frame: u64, point: [Real; 3], value: Real) -> OrchestratorResult<()>;

    /// Stage a frame-wide value.
    fn push_global(&mut self, key: &str, frame: u64, value: Real) -> OrchestratorResult<()>;

    /// Publish everything staged for `frame`.
    fn commit(&mut self, frame: u64) -> OrchestratorResult<()>;

    /// Release the received data of `frame`.
    fn forget(&mut self, frame: u64) -> OrchestratorResult<()>;
}

// ----- in-memory transport -----

#[derive(Debug, Default)]
struct Frame {
    committed: bool,
    points: Vec<([Real; 3], BTreeMap<String, Real>)>,
    globals: BTreeMap<String, Real>,
}

impl Frame {
    fn point_mut(&mut self, point: [Real; 3]) -> &mut BTreeMap<String, Real> {
        let pos = match self.points.iter().position(|(p, _)| *p == point) {
            Some(pos) => pos,
            None => {
                self.points.push((point, BTreeMap::new()));
                self.points.len() - 1
            }
        };
        &mut self.points[pos].1
    }
}

/// Announced span of one side.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    /// Frames covered.
    pub frames: Range<u64>,
    /// Region covered.
    pub region: Region,
}

#[derive(Debug, Default)]
struct Mailbox {
    frames: BTreeMap<u64, Frame>,
}

#[derive(Debug, Default)]
struct Exchange {
    // Indexed by the receiving side.
    mailboxes: [Mailbox; 2],
    send_spans: [Vec<Span>; 2],
    recv_spans: [Vec<Span>; 2],
}

/// One endpoint of an in-process exchange.
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    side: usize,
    shared: Arc<Mutex<Exchange>>,
}

impl InMemoryTransport {
    /// Two connected endpoints: the fluid side and the particle side.
    pub fn pair() -> (InMemoryTransport, InMemoryTransport) {
        let shared = Arc::new(Mutex::new(Exchange::default()));
        (
            InMemoryTransport {
                side: 0,
                shared: Arc::clone(&shared),
            },
            InMemoryTransport { side: 1, shared },
        )
    }

    fn lock(&self) -> MutexGuard<'_, Exchange> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peer(&self) -> usize {
        1 - self.side
    }

    /// Spans this endpoint announced for sending.
    pub fn send_spans(&self) -> Vec<Span> {
        self.lock().send_spans[self.side].clone()
    }

    /// Spans this endpoint announced for receiving.
    pub fn recv_spans(&self) -> Vec<Span> {
        self.lock().recv_spans[self.side].clone()
    }

    /// Whether `frame` still holds data waiting for this endpoint.
    pub fn has_pending(&self, frame: u64) -> bool {
        self.lock().mailboxes[self.side].frames.contains_key(&frame)
    }
}

impl ParticleTransport for InMemoryTransport {
    fn announce_send_span(&mut self, frames: Range<u64>, region: Region) -> OrchestratorResult<()> {
        let side = self.side;
        self.lock().send_spans[side].push(Span { frames, region });
        Ok(())
    }

    fn announce_recv_span(&mut self, frames: Range<u64>, region: Region) -> OrchestratorResult<()> {
        let side = self.side;
        self.lock().recv_spans[side].push(Span { frames, region });
        Ok(())
    }

    fn fetch_points(&mut self, key: &str, frame: u64, region: &Region) -> OrchestratorResult<Vec<([Real; 3], Real)>> {
        let side = self.side;
        let exchange = self.lock();
        let points = match exchange.mailboxes[side].frames.get(&frame) {
            Some(f) if f.committed => f
                .points
                .iter()
                .filter(|(p, _)| region.contains(*p))
                .filter_map(|(p, values)| values.get(key).map(|v| (*p, *v)))
                .collect(),
            _ => Vec::new(),
        };
        Ok(points)
    }

    fn fetch(&mut self, key: &str, frame: u64, point: [Real; 3]) -> OrchestratorResult<Option<Real>> {
        let side = self.side;
        let exchange = self.lock();
        Ok(exchange.mailboxes[side]
            .frames
            .get(&frame)
            .filter(|f| f.committed)
            .and_then(|f| f.points.iter().find(|(p, _)| *p == point))
            .and_then(|(_, values)| values.get(key).copied()))
    }

    fn fetch_global(&mut self, key: &str, frame: u64) -> OrchestratorResult<Option<Real>> {
        let side = self.side;
        let exchange = self.lock();
        Ok(exchange.mailboxes[side]
            .frames
            .get(&frame)
            .filter(|f| f.committed)
            .and_then(|f| f.globals.get(key).copied()))
    }

    fn push(&mut self, key: &str, frame: u64, point: [Real; 3], value: Real) -> OrchestratorResult<()> {
        let peer = self.peer();
        let mut exchange = self.lock();
        let f = exchange.mailboxes[peer].frames.entry(frame).or_default();
        f.point_mut(point).insert(key.to_string(), value);
        Ok(())
    }

    fn push_global(&mut self, key: &str, frame: u64, value: Real) -> OrchestratorResult<()> {
        let peer = self.peer();
        let mut exchange = self.lock();
        exchange.mailboxes[peer]
            .frames
            .entry(frame)
            .or_default()
            .globals
            .insert(key.to_string(), value);
        Ok(())
    }

    fn commit(&mut self, frame: u64) -> OrchestratorResult<()> {
        let peer = self.peer();
        let mut exchange = self.lock();
        exchange.mailboxes[peer].frames.entry(frame).or_default().committed = true;
        Ok(())
    }

    fn forget(&mut self, frame: u64) -> OrchestratorResult<()> {
        let side = self.side;
        self.lock().mailboxes[side].frames.remove(&frame);
        Ok(())
    }
}
