use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use worker_pool::{PoolError, RayonThreadPool, Result, ThreadPool, WorkerPool};

fn spawn_counter<P: ThreadPool>(pool: P, tasks: usize) -> Result<()> {
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..tasks {
        let counter = Arc::clone(&counter);
        pool.spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })?;
    }
    pool.shutdown();
    assert_eq!(counter.load(Ordering::SeqCst), tasks);
    Ok(())
}

fn spawn_panic_task<P: ThreadPool>() -> Result<()> {
    let pool = P::new(1)?;
    let log = Arc::new(Mutex::new(Vec::new()));

    for id in 1..=3 {
        let log = Arc::clone(&log);
        pool.spawn(move || {
            if id == 2 {
                panic!("task {id} blew up");
            }
            log.lock().unwrap().push(id);
        })?;
    }
    pool.shutdown();

    assert_eq!(*log.lock().unwrap(), vec![1, 3]);
    Ok(())
}

#[test]
fn worker_pool_runs_every_task_once() -> Result<()> {
    for workers in [1, 2, 4, 8] {
        spawn_counter(WorkerPool::new(workers)?, 100)?;
    }
    Ok(())
}

#[test]
fn rayon_pool_runs_every_task_once() -> Result<()> {
    for workers in [1, 2, 4, 8] {
        spawn_counter(RayonThreadPool::new(workers)?, 100)?;
    }
    Ok(())
}

#[test]
fn worker_pool_panic_task() -> Result<()> {
    spawn_panic_task::<WorkerPool>()
}

#[test]
fn rayon_pool_panic_task() -> Result<()> {
    spawn_panic_task::<RayonThreadPool>()
}

#[test]
fn panic_is_reported_as_failure() -> Result<()> {
    let pool = WorkerPool::builder().workers(2).thread_name("faulty").build()?;
    let failures = pool.failures();

    pool.submit(|| {})?;
    pool.submit(|| panic!("disk on fire"))?;
    pool.submit(|| {})?;
    pool.shutdown();

    let failure = failures.try_recv().expect("a failure was reported");
    assert_eq!(failure.task, 1);
    assert_eq!(failure.message, "disk on fire");
    assert!(failure.worker.starts_with("faulty-"));
    assert!(failures.try_recv().is_err());

    let stats = pool.stats();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 1);
    Ok(())
}

#[test]
fn panics_do_not_shrink_the_pool() -> Result<()> {
    let pool = WorkerPool::new(2)?;
    for _ in 0..10 {
        pool.submit(|| panic!("again"))?;
    }
    // Both workers must still be alive to meet at the barrier.
    let barrier = Arc::new(Barrier::new(3));
    for _ in 0..2 {
        let barrier = Arc::clone(&barrier);
        pool.submit(move || {
            barrier.wait();
        })?;
    }
    barrier.wait();
    assert_eq!(pool.stats().live_workers, 2);
    Ok(())
}

#[test]
fn zero_workers_is_invalid() {
    assert!(matches!(
        WorkerPool::new(0),
        Err(PoolError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        <WorkerPool as ThreadPool>::new(0),
        Err(PoolError::InvalidConfiguration(_))
    ));
}

#[test]
fn single_worker_completes_in_submission_order() -> Result<()> {
    let pool = WorkerPool::new(1)?;
    let log = Arc::new(Mutex::new(Vec::new()));

    for id in 1..=50 {
        let log = Arc::clone(&log);
        pool.submit(move || log.lock().unwrap().push(id))?;
    }
    pool.shutdown();

    let expected: Vec<u32> = (1..=50).collect();
    assert_eq!(*log.lock().unwrap(), expected);
    Ok(())
}

#[test]
fn eight_workers_twenty_tasks_with_sleeps() -> Result<()> {
    let pool = WorkerPool::new(8)?;
    let log = Arc::new(Mutex::new(Vec::new()));

    for id in 1..=20u32 {
        let log = Arc::clone(&log);
        pool.submit_with(id, move |id| {
            if id % 2 == 1 {
                thread::sleep(Duration::from_millis(20));
            }
            log.lock().unwrap().push(id);
        })?;
    }
    pool.shutdown();

    // Completion order is unspecified with several workers.
    let mut log = log.lock().unwrap().clone();
    log.sort_unstable();
    assert_eq!(log, (1..=20).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn arguments_are_captured_at_submission() -> Result<()> {
    let pool = WorkerPool::new(2)?;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut value = String::from("first");
    {
        let seen = Arc::clone(&seen);
        pool.submit_with(value.clone(), move |v| seen.lock().unwrap().push(v))?;
    }
    value.push_str("-changed");
    pool.shutdown();

    assert_eq!(*seen.lock().unwrap(), vec!["first".to_owned()]);
    assert_eq!(value, "first-changed");
    Ok(())
}

#[test]
fn shutdown_drains_queued_tasks() -> Result<()> {
    let pool = WorkerPool::new(2)?;
    let gate = Arc::new(Barrier::new(3));
    let counter = Arc::new(AtomicUsize::new(0));

    // Hold both workers so the rest of the tasks pile up in the queue.
    for _ in 0..2 {
        let gate = Arc::clone(&gate);
        pool.submit(move || {
            gate.wait();
        })?;
    }
    for _ in 0..30 {
        let counter = Arc::clone(&counter);
        pool.submit(move || {
            thread::sleep(Duration::from_millis(1));
            counter.fetch_add(1, Ordering::SeqCst);
        })?;
    }
    assert!(pool.stats().queued > 0);

    gate.wait();
    pool.shutdown();

    assert_eq!(counter.load(Ordering::SeqCst), 30);
    let stats = pool.stats();
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.live_workers, 0);
    assert_eq!(stats.submitted, 32);
    Ok(())
}

#[test]
fn drop_waits_for_tasks() -> Result<()> {
    let counter = Arc::new(AtomicUsize::new(0));
    {
        let pool = WorkerPool::new(3)?;
        for _ in 0..15 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
            })?;
        }
    }
    assert_eq!(counter.load(Ordering::SeqCst), 15);
    Ok(())
}

#[test]
fn submit_after_shutdown_is_rejected() -> Result<()> {
    let pool = WorkerPool::new(2)?;
    pool.shutdown();

    let ran = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&ran);
    let result = pool.submit(move || {
        r.fetch_add(1, Ordering::SeqCst);
    });

    assert!(matches!(result, Err(PoolError::PoolClosed)));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(pool.stats().submitted, 0);
    Ok(())
}

#[test]
fn second_shutdown_is_a_no_op() -> Result<()> {
    let pool = WorkerPool::new(2)?;
    pool.submit(|| {})?;
    pool.shutdown();
    let before = pool.stats();
    pool.shutdown();
    assert_eq!(pool.stats(), before);
    Ok(())
}

#[test]
fn submit_from_many_threads() -> Result<()> {
    let pool = Arc::new(WorkerPool::new(4)?);
    let counter = Arc::new(AtomicUsize::new(0));

    let submitters: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let counter = Arc::clone(&counter);
            thread::spawn(move || -> Result<()> {
                for _ in 0..50 {
                    let counter = Arc::clone(&counter);
                    pool.submit(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })?;
                }
                Ok(())
            })
        })
        .collect();
    for s in submitters {
        s.join().unwrap()?;
    }
    pool.shutdown();

    assert_eq!(counter.load(Ordering::SeqCst), 400);
    assert_eq!(pool.stats().completed, 400);
    Ok(())
}

#[test]
fn concurrent_shutdowns_both_wait_for_drain() -> Result<()> {
    let pool = Arc::new(WorkerPool::new(1)?);
    let gate = Arc::new(Barrier::new(2));
    let counter = Arc::new(AtomicUsize::new(0));

    {
        let gate = Arc::clone(&gate);
        pool.submit(move || {
            gate.wait();
        })?;
    }
    for _ in 0..10 {
        let counter = Arc::clone(&counter);
        pool.submit(move || {
            thread::sleep(Duration::from_millis(5));
            counter.fetch_add(1, Ordering::SeqCst);
        })?;
    }

    let other = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.shutdown())
    };
    while pool.submit(|| {}).is_ok() {
        thread::sleep(Duration::from_millis(1));
    }

    gate.wait();
    pool.shutdown();

    assert_eq!(counter.load(Ordering::SeqCst), 10);
    let stats = pool.stats();
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.live_workers, 0);
    other.join().unwrap();
    Ok(())
}
