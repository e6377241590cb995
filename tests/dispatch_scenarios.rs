//! End-to-end dispatch behavior across executor threads.

use std::{
  sync::{Arc, Mutex},
  thread,
  time::{Duration, Instant},
};

use signalpool::{
  chain, connect, disconnect, DeliveryMode, EndpointId, Executor, SignalEndpoint, SlotEndpoint,
  SlotTag,
};

fn wait_until(deadline: Duration, condition: impl Fn() -> bool) {
  let start = Instant::now();
  while !condition() {
    assert!(
      start.elapsed() < deadline,
      "condition not met within {deadline:?}"
    );
    thread::sleep(Duration::from_millis(1));
  }
}

#[test]
fn chained_signals_deliver_once() {
  let first = SignalEndpoint::<String>::new();
  let second = SignalEndpoint::<String>::new();
  let receiver = SlotEndpoint::detached();
  let seen = Arc::new(Mutex::new(Vec::new()));

  assert!(chain(&first, &second, DeliveryMode::Auto));
  let sink = Arc::clone(&seen);
  connect(
    &second,
    &receiver,
    SlotTag::fresh(),
    DeliveryMode::Direct,
    move |payload: &String| {
      sink.lock().unwrap().push(payload.clone());
    },
  );

  first.emit("x".to_string());
  assert_eq!(*seen.lock().unwrap(), vec!["x".to_string()]);

  disconnect(Some(&second.signal_ref()), Some(&receiver), None).unwrap();
  first.emit("y".to_string());
  assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn chaining_the_same_pair_twice_is_a_no_op() {
  let first = SignalEndpoint::<u32>::new();
  let second = SignalEndpoint::<u32>::new();
  let receiver = SlotEndpoint::detached();
  let hits = Arc::new(Mutex::new(0));

  assert!(chain(&first, &second, DeliveryMode::Auto));
  assert!(!chain(&first, &second, DeliveryMode::Auto));

  let sink = Arc::clone(&hits);
  connect(
    &second,
    &receiver,
    SlotTag::fresh(),
    DeliveryMode::Direct,
    move |_: &u32| {
      *sink.lock().unwrap() += 1;
    },
  );
  first.emit(1);
  assert_eq!(*hits.lock().unwrap(), 1);
}

#[test]
fn dropping_the_downstream_signal_breaks_the_chain() {
  let first = SignalEndpoint::<u32>::new();
  {
    let second = SignalEndpoint::<u32>::new();
    chain(&first, &second, DeliveryMode::Auto);
    assert_eq!(first.connection_count(), 1);
  }
  assert_eq!(first.connection_count(), 0);
  first.emit(1);
}

#[test]
fn auto_mode_tracks_sender_across_executors() {
  let home = Executor::spawn("home").unwrap();
  let away = Executor::spawn("away").unwrap();

  let signal = Arc::new(SignalEndpoint::<u8>::new());
  let receiver = Arc::new(SlotEndpoint::new(home.handle()));
  let observed: Arc<Mutex<Vec<(Option<EndpointId>, thread::ThreadId)>>> =
    Arc::new(Mutex::new(Vec::new()));

  {
    let sink = Arc::clone(&observed);
    let receiver_in_slot = Arc::clone(&receiver);
    connect(
      &signal,
      &receiver,
      SlotTag::fresh(),
      DeliveryMode::Auto,
      move |_: &u8| {
        sink
          .lock()
          .unwrap()
          .push((receiver_in_slot.current_sender(), thread::current().id()));
      },
    );
  }

  // Direct leg: emitted on the receiver's own executor.
  {
    let signal = Arc::clone(&signal);
    home.handle().submit(move || signal.emit(1)).unwrap();
  }
  wait_until(Duration::from_secs(2), || observed.lock().unwrap().len() == 1);

  // Queued leg: emitted from another executor, still lands on home.
  {
    let signal = Arc::clone(&signal);
    away.handle().submit(move || signal.emit(2)).unwrap();
  }
  wait_until(Duration::from_secs(2), || observed.lock().unwrap().len() == 2);

  let home_thread = home.handle().thread_id();
  for (sender, thread_id) in observed.lock().unwrap().iter() {
    assert_eq!(*sender, Some(signal.id()));
    assert_eq!(*thread_id, home_thread);
  }
}

#[test]
fn queued_deliveries_preserve_per_pair_order() {
  let executor = Executor::spawn("fifo").unwrap();
  let receiver = SlotEndpoint::new(executor.handle());
  let signal = SignalEndpoint::<u32>::new();
  let seen = Arc::new(Mutex::new(Vec::new()));

  let sink = Arc::clone(&seen);
  connect(
    &signal,
    &receiver,
    SlotTag::fresh(),
    DeliveryMode::Queued,
    move |value: &u32| {
      sink.lock().unwrap().push(*value);
    },
  );
  for i in 0..200 {
    signal.emit(i);
  }
  wait_until(Duration::from_secs(2), || seen.lock().unwrap().len() == 200);
  assert_eq!(*seen.lock().unwrap(), (0..200).collect::<Vec<_>>());
}

#[test]
fn no_delivery_after_receiver_drop() {
  let executor = Executor::spawn("drop-recv").unwrap();
  let signal = SignalEndpoint::<u32>::new();
  let hits = Arc::new(Mutex::new(0u32));
  {
    let receiver = SlotEndpoint::new(executor.handle());
    let sink = Arc::clone(&hits);
    connect(
      &signal,
      &receiver,
      SlotTag::fresh(),
      DeliveryMode::Queued,
      move |_: &u32| {
        *sink.lock().unwrap() += 1;
      },
    );
    signal.emit(1);
    wait_until(Duration::from_secs(2), || *hits.lock().unwrap() == 1);
  }
  assert_eq!(signal.connection_count(), 0);
  signal.emit(2);
  thread::sleep(Duration::from_millis(50));
  assert_eq!(*hits.lock().unwrap(), 1);
}

#[test]
fn blocking_delivery_completes_before_emit_returns() {
  let executor = Executor::spawn("blocking").unwrap();
  let receiver = SlotEndpoint::new(executor.handle());
  let signal = SignalEndpoint::<u32>::new();
  let done = Arc::new(Mutex::new(false));

  let flag = Arc::clone(&done);
  connect(
    &signal,
    &receiver,
    SlotTag::fresh(),
    DeliveryMode::BlockingQueued,
    move |_: &u32| {
      thread::sleep(Duration::from_millis(20));
      *flag.lock().unwrap() = true;
    },
  );
  signal.emit(1);
  assert!(*done.lock().unwrap());
}

#[test]
fn rebind_moves_queued_deliveries() {
  let first = Executor::spawn("rebind-a").unwrap();
  let second = Executor::spawn("rebind-b").unwrap();

  let signal = SignalEndpoint::<u32>::new();
  let receiver = SlotEndpoint::new(first.handle());
  let threads = Arc::new(Mutex::new(Vec::new()));

  let sink = Arc::clone(&threads);
  connect(
    &signal,
    &receiver,
    SlotTag::fresh(),
    DeliveryMode::Queued,
    move |_: &u32| {
      sink.lock().unwrap().push(thread::current().id());
    },
  );

  signal.emit(1);
  wait_until(Duration::from_secs(2), || threads.lock().unwrap().len() == 1);
  receiver.rebind(second.handle());
  signal.emit(2);
  wait_until(Duration::from_secs(2), || threads.lock().unwrap().len() == 2);

  let threads = threads.lock().unwrap();
  assert_eq!(threads[0], first.handle().thread_id());
  assert_eq!(threads[1], second.handle().thread_id());
}
