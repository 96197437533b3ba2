//! Time-bounded I2C bus
//!
//! The Linux I2C device blocks in the kernel until a transaction ends.
//! `TimedI2c` moves the real bus onto a worker thread and waits for each
//! transaction with a deadline, so a hung bus surfaces as an error
//! instead of freezing the caller.

use crate::error::Result;
use embedded_hal::i2c::{self, ErrorKind, ErrorType, I2c, Operation};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default per-transaction deadline
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("I2C transaction exceeded {0:?}")]
    Timeout(Duration),
    #[error("I2C bus still blocked by an earlier transaction")]
    Wedged,
    #[error("I2C worker is gone")]
    Disconnected,
    #[error("I2C bus error: {message}")]
    Bus { kind: ErrorKind, message: String },
}

impl i2c::Error for BusError {
    fn kind(&self) -> ErrorKind {
        match self {
            BusError::Bus { kind, .. } => *kind,
            _ => ErrorKind::Other,
        }
    }
}

enum Op {
    Write(Vec<u8>),
    Read(usize),
}

type Reply = std::result::Result<Vec<Vec<u8>>, BusError>;

struct Request {
    address: u8,
    ops: Vec<Op>,
    reply: mpsc::Sender<Reply>,
}

/// I2C bus whose transactions are bounded by a deadline
pub struct TimedI2c {
    requests: Option<mpsc::Sender<Request>>,
    worker: Option<JoinHandle<()>>,
    busy: Arc<AtomicBool>,
    timeout: Duration,
}

impl TimedI2c {
    /// Move `bus` onto a dedicated worker thread
    pub fn spawn<B>(bus: B, timeout: Duration) -> Result<Self>
    where
        B: I2c + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Request>();
        let busy = Arc::new(AtomicBool::new(false));
        let worker_busy = busy.clone();

        let worker = thread::Builder::new()
            .name("i2c-bus".to_string())
            .spawn(move || serve(bus, rx, worker_busy))?;

        Ok(Self {
            requests: Some(tx),
            worker: Some(worker),
            busy,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True while a timed-out transaction is still stuck on the worker
    pub fn is_wedged(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn execute(&self, address: u8, ops: Vec<Op>) -> Reply {
        if self.is_wedged() {
            return Err(BusError::Wedged);
        }
        let requests = self.requests.as_ref().ok_or(BusError::Disconnected)?;
        let (reply_tx, reply_rx) = mpsc::channel();
        requests
            .send(Request {
                address,
                ops,
                reply: reply_tx,
            })
            .map_err(|_| BusError::Disconnected)?;

        match reply_rx.recv_timeout(self.timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    address = address,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "I2C transaction timed out"
                );
                Err(BusError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(BusError::Disconnected),
        }
    }
}

impl ErrorType for TimedI2c {
    type Error = BusError;
}

impl I2c for TimedI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> std::result::Result<(), Self::Error> {
        let ops = operations
            .iter()
            .map(|op| match op {
                Operation::Write(data) => Op::Write(data.to_vec()),
                Operation::Read(buf) => Op::Read(buf.len()),
            })
            .collect();

        let mut reads = self.execute(address, ops)?.into_iter();
        for op in operations.iter_mut() {
            if let Operation::Read(buf) = op {
                let data = reads.next().ok_or(BusError::Disconnected)?;
                buf.copy_from_slice(&data);
            }
        }
        Ok(())
    }
}

impl Drop for TimedI2c {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if self.is_wedged() {
                tracing::warn!("I2C worker still blocked, detaching");
            } else if worker.join().is_err() {
                tracing::error!("I2C worker panicked");
            }
        }
    }
}

/// Worker loop: owns the real bus and runs one transaction at a time
fn serve<B: I2c>(mut bus: B, requests: mpsc::Receiver<Request>, busy: Arc<AtomicBool>) {
    for request in requests {
        busy.store(true, Ordering::Release);

        let mut buffers: Vec<(bool, Vec<u8>)> = request
            .ops
            .into_iter()
            .map(|op| match op {
                Op::Write(data) => (false, data),
                Op::Read(len) => (true, vec![0; len]),
            })
            .collect();

        let result = {
            let mut ops: Vec<Operation<'_>> = buffers
                .iter_mut()
                .map(|(is_read, buf)| {
                    if *is_read {
                        Operation::Read(buf.as_mut_slice())
                    } else {
                        Operation::Write(buf.as_slice())
                    }
                })
                .collect();
            bus.transaction(request.address, &mut ops)
        };

        let reply = match result {
            Ok(()) => Ok(buffers
                .into_iter()
                .filter(|(is_read, _)| *is_read)
                .map(|(_, buf)| buf)
                .collect()),
            Err(e) => Err(BusError::Bus {
                kind: i2c::Error::kind(&e),
                message: format!("{:?}", e),
            }),
        };

        busy.store(false, Ordering::Release);
        // The caller may have given up waiting
        let _ = request.reply.send(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pca9685::mock::{MockBus, Transaction};

    #[test]
    fn test_passes_through_writes_and_reads() {
        let mock = MockBus::new();
        mock.set_register(0x00, 0x11);
        let mut bus = TimedI2c::spawn(mock.clone(), DEFAULT_TRANSACTION_TIMEOUT).unwrap();

        bus.write(0x40, &[0x01, 0x04]).unwrap();
        let mut buf = [0u8];
        bus.write_read(0x40, &[0x00], &mut buf).unwrap();

        assert_eq!(buf[0], 0x11);
        assert_eq!(mock.register(0x01), 0x04);
        assert_eq!(
            mock.transactions(),
            vec![
                Transaction::Write { addr: 0x40, data: vec![0x01, 0x04] },
                Transaction::Write { addr: 0x40, data: vec![0x00] },
                Transaction::Read { addr: 0x40, register: 0x00, len: 1 },
            ]
        );
    }

    #[test]
    fn test_bus_error_is_forwarded() {
        let mock = MockBus::new();
        mock.fail_writes(true);
        let mut bus = TimedI2c::spawn(mock, DEFAULT_TRANSACTION_TIMEOUT).unwrap();
        let err = bus.write(0x40, &[0x00, 0x00]).unwrap_err();
        assert!(matches!(err, BusError::Bus { kind: ErrorKind::Other, .. }));
        assert!(!bus.is_wedged());
    }

    #[test]
    fn test_hung_transaction_times_out() {
        let mock = MockBus::new();
        mock.set_delay(Some(Duration::from_millis(300)));
        let mut bus = TimedI2c::spawn(mock.clone(), Duration::from_millis(50)).unwrap();

        let err = bus.write(0x40, &[0x00, 0x00]).unwrap_err();
        assert_eq!(err, BusError::Timeout(Duration::from_millis(50)));
        // Still stuck: later calls fail fast
        assert_eq!(bus.write(0x40, &[0x00, 0x00]).unwrap_err(), BusError::Wedged);

        // Once the stuck transaction ends the bus is usable again
        mock.set_delay(None);
        std::thread::sleep(Duration::from_millis(400));
        assert!(!bus.is_wedged());
        bus.write(0x40, &[0x00, 0x00]).unwrap();
    }
}
