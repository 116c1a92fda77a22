//! Simulated photon counter with a fixed number of channels.

use std::sync::Mutex;

use labnet_rpc::{BoundArgs, Operation};
use labnet_server::{ModuleError, Service};
use rand::Rng;
use serde_json::{Value, json};

#[derive(Debug)]
pub struct SimCounter {
    totals: Mutex<Vec<u64>>,
    mean_rate: u64,
}

impl SimCounter {
    #[must_use]
    pub fn new(channels: usize, mean_rate: u64) -> Self {
        Self {
            totals: Mutex::new(vec![0; channels]),
            mean_rate,
        }
    }

    fn slot(channel: u32, len: usize) -> Result<usize, ModuleError> {
        channel
            .checked_sub(1)
            .and_then(|i| usize::try_from(i).ok())
            .filter(|&i| i < len)
            .ok_or_else(|| ModuleError::failed(format!("no channel {channel}")))
    }

    /// Accumulate one bin of counts on `channel` and return the new total.
    pub fn get_counts(&self, channel: u32) -> Result<u64, ModuleError> {
        let mut totals = self
            .totals
            .lock()
            .map_err(|_| ModuleError::failed("counter state poisoned"))?;
        let index = Self::slot(channel, totals.len())?;
        let bin = rand::rng().random_range(0..=self.mean_rate.saturating_mul(2));
        totals[index] += bin;
        Ok(totals[index])
    }

    pub fn clear(&self, channel: u32) -> Result<(), ModuleError> {
        let mut totals = self
            .totals
            .lock()
            .map_err(|_| ModuleError::failed("counter state poisoned"))?;
        let index = Self::slot(channel, totals.len())?;
        totals[index] = 0;
        Ok(())
    }
}

impl Default for SimCounter {
    fn default() -> Self {
        Self::new(8, 1_000)
    }
}

pub struct CounterService;

const GET_COUNTS: Operation = Operation::new("get_counts", &["channel"]);
const CLEAR: Operation = Operation::new("clear", &["channel"]);

impl Service for CounterService {
    type Module = SimCounter;
    const MODULE_TYPE: &'static str = "counter";
    const OPERATIONS: &'static [Operation] = &[GET_COUNTS, CLEAR];

    async fn invoke(&self, module: &SimCounter, args: BoundArgs) -> Result<Value, ModuleError> {
        let channel: u32 = args.get(0)?;
        match args.operation().name {
            "get_counts" => Ok(json!(module.get_counts(channel)?)),
            "clear" => {
                module.clear(channel)?;
                Ok(Value::Null)
            }
            other => Err(ModuleError::failed(format!("unhandled {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_accumulate_and_clear() {
        let counter = SimCounter::new(2, 10);
        let first = counter.get_counts(2).unwrap();
        let second = counter.get_counts(2).unwrap();
        assert!(second >= first);
        assert!(second <= 40);

        counter.clear(2).unwrap();
        assert!(counter.get_counts(2).unwrap() <= 20);
    }

    #[test]
    fn test_unknown_channel() {
        let counter = SimCounter::new(2, 10);
        assert!(counter.get_counts(0).is_err());
        assert!(counter.clear(3).is_err());
    }
}
