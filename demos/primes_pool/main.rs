//! Prime-counting pool demo: counts primes in ranges, resizes the pool
//! mid-run and drains cleanly on drop.
//!
//! Run with `cargo run --example primes_pool`.

use std::{
  sync::{Arc, Mutex},
  thread,
  time::Duration,
};

use log::info;
use signalpool::{Controller, PoolHandle, Processor, Worker};

#[derive(Clone, Debug)]
struct Range {
  lo: u64,
  hi: u64,
}

#[derive(Clone, Debug)]
struct Count {
  range: Range,
  primes: u64,
}

struct PrimeCounter;

impl PrimeCounter {
  fn is_prime(n: u64) -> bool {
    if n < 2 {
      return false;
    }
    let mut d = 2;
    while d * d <= n {
      if n % d == 0 {
        return false;
      }
      d += 1;
    }
    true
  }
}

impl Worker for PrimeCounter {
  type Task = Range;
  type Output = Count;

  fn fulfill(&mut self, task: Range) -> Count {
    let primes = (task.lo..task.hi).filter(|n| Self::is_prime(*n)).count() as u64;
    Count {
      range: task,
      primes,
    }
  }

  fn clone_prototype(&self) -> Box<dyn Worker<Task = Range, Output = Count>> {
    Box::new(PrimeCounter)
  }
}

struct Tally {
  total: Arc<Mutex<u64>>,
  pending: usize,
}

impl Processor for Tally {
  type Task = Range;
  type Output = Count;

  fn on_result(&mut self, result: Count, pool: &PoolHandle<Range>) {
    info!(
      "[{}, {}) holds {} primes",
      result.range.lo, result.range.hi, result.primes
    );
    *self.total.lock().unwrap() += result.primes;
    self.pending -= 1;
    if self.pending == 20 {
      // Halfway through: twice the workers for the remainder.
      pool.set_thread_count(4);
    }
  }
}

fn main() {
  env_logger::init();

  let total = Arc::new(Mutex::new(0));
  let ranges: Vec<Range> = (0..40)
    .map(|i| Range {
      lo: i * 25_000,
      hi: (i + 1) * 25_000,
    })
    .collect();

  let controller = Controller::new(
    Box::new(Tally {
      total: Arc::clone(&total),
      pending: ranges.len(),
    }),
    Box::new(PrimeCounter),
    2,
  )
  .expect("pool construction failed");

  controller.handle().extend_queue(ranges);

  // Poll the tally until the pool drains.
  loop {
    thread::sleep(Duration::from_millis(100));
    let counted = *total.lock().unwrap();
    if counted > 0 {
      println!("primes below 1_000_000 so far: {counted}");
    }
    if counted >= 78_498 {
      break;
    }
  }
  println!("done: {} primes below 1_000_000", *total.lock().unwrap());
}
