//! Mock I2C bus for testing
//!
//! Models a register file with auto-increment and records every
//! transaction for verification.

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, Operation};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Recorded bus transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    /// Register write (first byte is the register pointer)
    Write { addr: u8, data: Vec<u8> },
    /// Read starting at `register`
    Read { addr: u8, register: u8, len: usize },
}

#[derive(Default)]
struct Inner {
    registers: Vec<u8>,
    transactions: Vec<Transaction>,
    pointer: u8,
    fail_writes: bool,
    delay: Option<Duration>,
}

/// Cloneable handle; clones share state so tests can inspect a bus
/// after handing it to a driver.
#[derive(Clone)]
pub struct MockBus {
    inner: Arc<Mutex<Inner>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                registers: vec![0; 256],
                ..Inner::default()
            })),
        }
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.inner.lock().transactions.clone()
    }

    /// Channel writes only (5-byte LED register frames)
    pub fn channel_writes(&self) -> Vec<Vec<u8>> {
        self.transactions()
            .into_iter()
            .filter_map(|t| match t {
                Transaction::Write { data, .. } if data.len() == 5 => Some(data),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().transactions.clear();
    }

    pub fn set_register(&self, register: u8, value: u8) {
        self.inner.lock().registers[register as usize] = value;
    }

    pub fn register(&self, register: u8) -> u8 {
        self.inner.lock().registers[register as usize]
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    /// Stall every transaction, simulating a hung bus
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.inner.lock().delay = delay;
    }
}

impl ErrorType for MockBus {
    type Error = ErrorKind;
}

impl I2c for MockBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let delay = self.inner.lock().delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut inner = self.inner.lock();
        for op in operations.iter_mut() {
            match op {
                Operation::Write(data) => {
                    if inner.fail_writes {
                        return Err(ErrorKind::Other);
                    }
                    inner.transactions.push(Transaction::Write {
                        addr: address,
                        data: data.to_vec(),
                    });
                    if let Some((&register, values)) = data.split_first() {
                        inner.pointer = register;
                        for (i, value) in values.iter().enumerate() {
                            let slot = register.wrapping_add(i as u8) as usize;
                            inner.registers[slot] = *value;
                        }
                    }
                }
                Operation::Read(buf) => {
                    let register = inner.pointer;
                    inner.transactions.push(Transaction::Read {
                        addr: address,
                        register,
                        len: buf.len(),
                    });
                    for (i, byte) in buf.iter_mut().enumerate() {
                        *byte = inner.registers[register.wrapping_add(i as u8) as usize];
                    }
                }
            }
        }
        Ok(())
    }
}
