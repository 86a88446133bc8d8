use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use blockdb::lock::Lock;
use blockdb::Error;

const LONG: Duration = Duration::from_secs(10);

fn wait_for_waiters(lock: &Lock, count: usize) {
    let deadline = Instant::now() + LONG;
    while lock.waiting() < count {
        assert!(Instant::now() < deadline, "waiters never queued");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_writers_exclude_everyone() {
    let lock = Arc::new(Lock::new("counter"));
    let writers = Arc::new(AtomicUsize::new(0));
    let readers = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for id in 0..8 {
        let (lock, writers, readers, total) =
            (lock.clone(), writers.clone(), readers.clone(), total.clone());
        handles.push(thread::spawn(move || {
            for i in 0..200 {
                if (id + i) % 3 == 0 {
                    let _guard = lock.write(LONG).unwrap();
                    assert_eq!(writers.fetch_add(1, Ordering::SeqCst), 0);
                    assert_eq!(readers.load(Ordering::SeqCst), 0);
                    total.fetch_add(1, Ordering::SeqCst);
                    writers.fetch_sub(1, Ordering::SeqCst);
                } else {
                    let _guard = lock.read(LONG).unwrap();
                    readers.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(writers.load(Ordering::SeqCst), 0);
                    readers.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(total.load(Ordering::SeqCst) > 0);
    assert!(lock.is_idle());
}

#[test]
fn test_readers_run_together() {
    let lock = Arc::new(Lock::new("shared"));
    let _held = lock.read(LONG).unwrap();

    let other = lock.clone();
    let handle = thread::spawn(move || {
        let _guard = other.read(Duration::from_millis(200)).unwrap();
        other.active_readers()
    });
    assert_eq!(handle.join().unwrap(), 2);
}

#[test]
fn test_no_wait_never_blocks() {
    let lock = Lock::new("t");
    {
        let _reader = lock.read(LONG).unwrap();
        let started = Instant::now();
        assert!(lock.try_write().is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
    let writer = lock.try_write();
    assert!(writer.is_some());
    assert!(lock.try_write().is_none());
    drop(writer);
    assert!(lock.is_idle());
}

#[test]
fn test_timeout_is_bounded_and_restores_state() {
    let lock = Arc::new(Lock::new("slow"));
    let writer = lock.write(LONG).unwrap();

    let other = lock.clone();
    let handle = thread::spawn(move || {
        let started = Instant::now();
        let result = other.read(Duration::from_millis(50)).map(|_| ());
        (result, started.elapsed())
    });
    let (result, elapsed) = handle.join().unwrap();

    match result {
        Err(Error::LockTimeout { resource, .. }) => assert_eq!(resource, "slow"),
        other => panic!("expected a lock timeout, got {:?}", other),
    }
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < LONG);
    assert_eq!(lock.waiting(), 0);

    drop(writer);
    assert!(lock.is_idle());
    assert!(lock.try_write().is_some());
}

#[test]
fn test_queued_writer_is_not_starved() {
    let lock = Arc::new(Lock::new("t"));
    let reader = lock.read(LONG).unwrap();

    let other = lock.clone();
    let writer = thread::spawn(move || {
        let _guard = other.write(LONG).unwrap();
    });
    wait_for_waiters(&lock, 1);

    // A reader arriving after the queued writer must not pass it
    assert!(lock.read(Duration::from_millis(50)).unwrap_err().is_lock_timeout());

    drop(reader);
    writer.join().unwrap();
    assert!(lock.is_idle());
}

#[test]
fn test_waiting_readers_are_granted_together() {
    let lock = Arc::new(Lock::new("t"));
    let writer = lock.write(LONG).unwrap();
    let barrier = Arc::new(Barrier::new(3));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let (lock, barrier) = (lock.clone(), barrier.clone());
            thread::spawn(move || {
                let _guard = lock.read(LONG).unwrap();
                // Every reader holds the lock here at the same time
                barrier.wait();
            })
        })
        .collect();
    wait_for_waiters(&lock, 3);

    drop(writer);
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(lock.is_idle());
}
