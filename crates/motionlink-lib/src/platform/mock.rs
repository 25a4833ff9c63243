//! In-memory platform for unit and integration tests.
//!
//! Always compiled, hidden from public docs. Reads and writes are scripted per
//! channel path; the platform records every write, cancellation, and live
//! resource so tests can assert on the engine's bookkeeping.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use super::{Completion, IoStatus, OsError, Platform, Primitive, WaitOutcome};

/// Scripted outcome of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockWrite {
    /// Transfers the whole report.
    Complete,
    /// Transfers only this many bytes.
    Short(usize),
    /// Stays in flight.
    Pending,
    Fail(OsError),
}

#[derive(Debug, Default)]
struct MockChannel {
    /// Consumed by `start_read`; empty means the read goes pending.
    immediate_reads: VecDeque<Result<Vec<u8>, OsError>>,
    /// Consumed by `poll_read` while a read is pending.
    arrived_reads: VecDeque<Result<Vec<u8>, OsError>>,
    /// Consumed by `start_write`; empty means full completion.
    write_script: VecDeque<MockWrite>,
    /// Consumed by `poll_write` while a write is pending; empty means still pending.
    deferred_writes: VecDeque<MockWrite>,
    written: Vec<Vec<u8>>,
    reads_issued: usize,
    cancels: usize,
    settles: usize,
    /// Bumped by every cancellation; operations started in an older epoch are aborted.
    epoch: u32,
    input_buffers: Option<u32>,
    open: bool,
}

#[derive(Debug, Default)]
struct MockState {
    channels: HashMap<String, MockChannel>,
    next_primitive: isize,
    live_handles: usize,
    live_completions: usize,
    fail_open: HashSet<String>,
    fail_input_buffers: HashSet<String>,
    fail_send_completions: bool,
    fail_wait: bool,
}

/// Scriptable in-memory platform. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockPlatform {
    state: Rc<RefCell<MockState>>,
}

pub struct MockHandle {
    path: String,
    state: Rc<RefCell<MockState>>,
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let mut st = self.state.borrow_mut();
        st.live_handles -= 1;
        if let Some(ch) = st.channels.get_mut(&self.path) {
            ch.open = false;
        }
    }
}

pub struct MockCompletion {
    primitive: Primitive,
    /// Channel path and epoch of the operation in flight, if any.
    target: Option<(String, u32)>,
    state: Rc<RefCell<MockState>>,
}

impl Completion for MockCompletion {
    fn primitive(&self) -> Primitive {
        self.primitive
    }
}

impl Drop for MockCompletion {
    fn drop(&mut self) {
        self.state.borrow_mut().live_completions -= 1;
    }
}

fn copy_payload(data: &[u8], buf: &mut [u8]) -> usize {
    let n = data.len().min(buf.len());
    buf[..n].copy_from_slice(&data[..n]);
    n
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_channel<T>(&self, path: &str, f: impl FnOnce(&mut MockChannel) -> T) -> T {
        let mut st = self.state.borrow_mut();
        f(st.channels.entry(path.to_string()).or_default())
    }

    /// Queue a report that the next read on `path` returns synchronously.
    pub fn push_read(&self, path: &str, data: &[u8]) {
        self.with_channel(path, |ch| ch.immediate_reads.push_back(Ok(data.to_vec())));
    }

    /// Make the next read issuance on `path` fail.
    pub fn push_read_error(&self, path: &str, err: OsError) {
        self.with_channel(path, |ch| ch.immediate_reads.push_back(Err(err)));
    }

    /// Complete the read currently pending on `path`.
    pub fn arrive(&self, path: &str, data: &[u8]) {
        self.with_channel(path, |ch| ch.arrived_reads.push_back(Ok(data.to_vec())));
    }

    /// Fail the read currently pending on `path`.
    pub fn arrive_error(&self, path: &str, err: OsError) {
        self.with_channel(path, |ch| ch.arrived_reads.push_back(Err(err)));
    }

    /// Script the outcome of the next write issued on `path`.
    pub fn script_write(&self, path: &str, outcome: MockWrite) {
        self.with_channel(path, |ch| ch.write_script.push_back(outcome));
    }

    /// Resolve the write currently pending on `path`.
    pub fn complete_write(&self, path: &str, outcome: MockWrite) {
        self.with_channel(path, |ch| ch.deferred_writes.push_back(outcome));
    }

    pub fn fail_open(&self, path: &str) {
        self.state.borrow_mut().fail_open.insert(path.to_string());
    }

    pub fn fail_input_buffers(&self, path: &str) {
        self.state
            .borrow_mut()
            .fail_input_buffers
            .insert(path.to_string());
    }

    pub fn set_fail_send_completions(&self, fail: bool) {
        self.state.borrow_mut().fail_send_completions = fail;
    }

    pub fn set_fail_wait(&self, fail: bool) {
        self.state.borrow_mut().fail_wait = fail;
    }

    /// Every report written to `path`, in issue order.
    pub fn written(&self, path: &str) -> Vec<Vec<u8>> {
        self.with_channel(path, |ch| ch.written.clone())
    }

    pub fn reads_issued(&self, path: &str) -> usize {
        self.with_channel(path, |ch| ch.reads_issued)
    }

    pub fn cancels(&self, path: &str) -> usize {
        self.with_channel(path, |ch| ch.cancels)
    }

    pub fn settles(&self, path: &str) -> usize {
        self.with_channel(path, |ch| ch.settles)
    }

    pub fn input_buffers(&self, path: &str) -> Option<u32> {
        self.with_channel(path, |ch| ch.input_buffers)
    }

    pub fn is_open(&self, path: &str) -> bool {
        self.with_channel(path, |ch| ch.open)
    }

    pub fn live_handles(&self) -> usize {
        self.state.borrow().live_handles
    }

    pub fn live_completions(&self) -> usize {
        self.state.borrow().live_completions
    }

    fn new_completion(&self) -> MockCompletion {
        let mut st = self.state.borrow_mut();
        st.next_primitive += 1;
        st.live_completions += 1;
        MockCompletion {
            primitive: Primitive::from_raw(st.next_primitive),
            target: None,
            state: Rc::clone(&self.state),
        }
    }

    /// Whether `op` was started in an epoch that a cancellation has since ended.
    fn aborted(&self, op: &MockCompletion) -> bool {
        match &op.target {
            Some((path, epoch)) => self.with_channel(path, |ch| ch.epoch != *epoch),
            None => false,
        }
    }
}

impl Platform for MockPlatform {
    type Handle = MockHandle;
    type Completion = MockCompletion;

    fn open_channel(&self, path: &str) -> Result<MockHandle, OsError> {
        let mut st = self.state.borrow_mut();
        if st.fail_open.contains(path) {
            return Err(OsError::Code(2));
        }
        st.live_handles += 1;
        st.channels.entry(path.to_string()).or_default().open = true;
        Ok(MockHandle {
            path: path.to_string(),
            state: Rc::clone(&self.state),
        })
    }

    fn set_input_buffers(&self, handle: &MockHandle, count: u32) -> Result<(), OsError> {
        if self.state.borrow().fail_input_buffers.contains(&handle.path) {
            return Err(OsError::Code(87));
        }
        self.with_channel(&handle.path, |ch| ch.input_buffers = Some(count));
        Ok(())
    }

    fn create_read_completion(&self, _handle: &MockHandle) -> Result<MockCompletion, OsError> {
        Ok(self.new_completion())
    }

    fn create_send_completion(&self) -> Result<MockCompletion, OsError> {
        if self.state.borrow().fail_send_completions {
            return Err(OsError::Code(8));
        }
        Ok(self.new_completion())
    }

    fn start_read(
        &self,
        handle: &MockHandle,
        op: &mut MockCompletion,
        buf: &mut [u8],
    ) -> Result<IoStatus, OsError> {
        let (next, epoch) = self.with_channel(&handle.path, |ch| {
            ch.reads_issued += 1;
            (ch.immediate_reads.pop_front(), ch.epoch)
        });
        match next {
            Some(Ok(data)) => Ok(IoStatus::Complete(copy_payload(&data, buf))),
            Some(Err(e)) => Err(e),
            None => {
                op.target = Some((handle.path.clone(), epoch));
                Ok(IoStatus::Pending)
            }
        }
    }

    fn poll_read(
        &self,
        handle: &MockHandle,
        op: &mut MockCompletion,
        buf: &mut [u8],
    ) -> Result<IoStatus, OsError> {
        if self.aborted(op) {
            op.target = None;
            return Err(OsError::Aborted);
        }
        match self.with_channel(&handle.path, |ch| ch.arrived_reads.pop_front()) {
            Some(Ok(data)) => {
                op.target = None;
                Ok(IoStatus::Complete(copy_payload(&data, buf)))
            }
            Some(Err(e)) => {
                op.target = None;
                Err(e)
            }
            None => Ok(IoStatus::Pending),
        }
    }

    fn start_write(
        &self,
        handle: &MockHandle,
        op: &mut MockCompletion,
        report: &[u8],
    ) -> Result<IoStatus, OsError> {
        let (outcome, epoch) = self.with_channel(&handle.path, |ch| {
            ch.written.push(report.to_vec());
            (ch.write_script.pop_front(), ch.epoch)
        });
        match outcome.unwrap_or(MockWrite::Complete) {
            MockWrite::Complete => Ok(IoStatus::Complete(report.len())),
            MockWrite::Short(n) => Ok(IoStatus::Complete(n)),
            MockWrite::Pending => {
                op.target = Some((handle.path.clone(), epoch));
                Ok(IoStatus::Pending)
            }
            MockWrite::Fail(e) => Err(e),
        }
    }

    fn poll_write(
        &self,
        handle: &MockHandle,
        op: &mut MockCompletion,
        report: &[u8],
    ) -> Result<IoStatus, OsError> {
        if self.aborted(op) {
            op.target = None;
            return Err(OsError::Aborted);
        }
        let outcome = self.with_channel(&handle.path, |ch| ch.deferred_writes.pop_front());
        let status = match outcome {
            None | Some(MockWrite::Pending) => return Ok(IoStatus::Pending),
            Some(MockWrite::Complete) => Ok(IoStatus::Complete(report.len())),
            Some(MockWrite::Short(n)) => Ok(IoStatus::Complete(n)),
            Some(MockWrite::Fail(e)) => Err(e),
        };
        op.target = None;
        status
    }

    fn cancel_io(&self, handle: &MockHandle) {
        self.with_channel(&handle.path, |ch| {
            ch.cancels += 1;
            ch.epoch += 1;
        });
    }

    fn settle(&self, handle: &MockHandle, op: &mut MockCompletion) {
        op.target = None;
        self.with_channel(&handle.path, |ch| ch.settles += 1);
    }

    fn wait_one(&self, op: &MockCompletion, timeout: Duration) -> WaitOutcome {
        self.wait_any(&[op], timeout)
    }

    fn wait_any(&self, ops: &[&MockCompletion], _timeout: Duration) -> WaitOutcome {
        if self.state.borrow().fail_wait {
            return WaitOutcome::Failed;
        }
        let signaled = ops.iter().any(|op| {
            !self.aborted(op)
                && op.target.as_ref().is_some_and(|(path, _)| {
                    self.with_channel(path, |ch| {
                        !ch.arrived_reads.is_empty() || !ch.deferred_writes.is_empty()
                    })
                })
        });
        if signaled {
            WaitOutcome::Signaled
        } else {
            WaitOutcome::TimedOut
        }
    }
}
