use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chanio::Error;
use chanio_executor::{spawn_local, sync_gate, EventLoop};

#[test]
fn test_shutdown_closes_registered_drivers() {
    let event_loop = EventLoop::new("it-registration").unwrap();
    let exited = Arc::new(AtomicBool::new(false));
    let (signal, gate) = sync_gate::<()>();

    let el = event_loop.clone();
    let flag = Arc::clone(&exited);
    event_loop
        .schedule(move || {
            let mut registration = el.register().unwrap();
            spawn_local(async move {
                signal.release(Ok(()));
                registration.closed().await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.store(true, Ordering::SeqCst);
                drop(registration);
            })
            .detach();
        })
        .unwrap();

    gate.wait_timeout(Duration::from_secs(5)).unwrap();
    event_loop.shutdown_gracefully().unwrap();
    assert!(exited.load(Ordering::SeqCst));
}

#[test]
fn test_future_awaited_inside_loop() {
    let event_loop = EventLoop::new("it-await").unwrap();
    let (promise, future) = event_loop.make_promise::<&'static str>();
    let (signal, gate) = sync_gate::<&'static str>();

    event_loop
        .schedule(move || {
            spawn_local(async move {
                signal.release(future.await);
            })
            .detach();
        })
        .unwrap();

    std::thread::sleep(Duration::from_millis(10));
    promise.succeed("from another thread");
    assert_eq!(
        gate.wait_timeout(Duration::from_secs(5)).unwrap(),
        "from another thread"
    );
    event_loop.shutdown_gracefully().unwrap();
}

#[test]
fn test_pending_work_fails_after_shutdown() {
    let event_loop = EventLoop::new("it-pending").unwrap();
    let (promise, future) = event_loop.make_promise::<u8>();
    let (signal, gate) = sync_gate::<u8>();

    // the promise lives in a task that never completes it
    event_loop
        .schedule(move || {
            spawn_local(async move {
                let _promise = promise;
                std::future::pending::<()>().await;
            })
            .detach();
        })
        .unwrap();

    std::thread::spawn(move || signal.release(future.wait()));
    event_loop.shutdown_gracefully().unwrap();
    assert!(matches!(
        gate.wait_timeout(Duration::from_secs(5)),
        Err(Error::BrokenPromise)
    ));
}

#[test]
#[should_panic]
fn test_spawn_local_off_loop_panics() {
    spawn_local(async {}).detach();
}
