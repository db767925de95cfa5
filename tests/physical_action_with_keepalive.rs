//! An asynchronous physical event delivered from another thread wakes a
//! keep-alive app that would otherwise have shut down on empty queues.

use std::sync::{Arc, Mutex};

use cadence::runtime::{App, Config, TimeValue};

#[test]
fn physical_action_with_keepalive() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut app = App::new(
        "keepalive",
        Config {
            keep_alive: true,
            ..Default::default()
        },
    );
    let top = app.top();
    let ping = app
        .add_physical_action::<u32>(top, "ping", TimeValue::ZERO)
        .unwrap();

    let received = Arc::new(Mutex::new(None));
    let observed = received.clone();
    app.add_reaction(top, "on_ping", move |ctx| {
        *observed.lock().unwrap() = ctx.get_action(ping)?;
        ctx.request_stop();
        Ok(())
    })
    .with_trigger(ping)
    .with_sched(ping)
    .finish()
    .unwrap();

    let scheduler = app.async_scheduler();
    let sender = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(scheduler.schedule(ping, TimeValue::ZERO, Some(7u32)));
    });

    app.run().unwrap();
    sender.join().unwrap();

    assert_eq!(*received.lock().unwrap(), Some(7));
}
