//! Synchronous remote procedure calls between siblings: a caller port
//! invokes the procedure bound to a callee port, with no queueing.

use std::sync::{Arc, Mutex};

use cadence::runtime::{App, Config, ReactionKind, Trigger};

#[test]
fn caller_invokes_procedure() {
    let mut app = App::new(
        "rpc",
        Config {
            fast: true,
            ..Default::default()
        },
    );
    let top = app.top();
    let server = app.add_reactor(top, "server").unwrap();
    let client = app.add_reactor(top, "client").unwrap();

    let service = app.add_callee::<u32, u32>(server, "service").unwrap();
    let query = app.add_caller::<u32, u32>(client, "query").unwrap();

    let procedure = app
        .add_reaction(server, "double", move |ctx| {
            let arg = ctx.call_argument(service)?.expect("called with a value");
            ctx.set_return(service, arg * 2)?;
            Ok(())
        })
        .with_trigger(service)
        .finish()
        .unwrap();
    assert_eq!(
        app.reaction(procedure).unwrap().kind(),
        ReactionKind::Procedure
    );

    let answer = Arc::new(Mutex::new(None));
    let observed = answer.clone();
    app.add_reaction(client, "ask", move |ctx| {
        *observed.lock().unwrap() = ctx.call(query, 21u32)?;
        Ok(())
    })
    .with_trigger(Trigger::Startup)
    .with_caller(query)
    .finish()
    .unwrap();

    app.connect_call(query, service).unwrap();

    app.run().unwrap();
    assert_eq!(*answer.lock().unwrap(), Some(42));
}

/// At most one procedure may be bound to a callee port.
#[test]
fn second_procedure_is_rejected() {
    let mut app = App::new("rpc_double_bind", Config::default());
    let top = app.top();
    let server = app.add_reactor(top, "server").unwrap();
    let service = app.add_callee::<u32, u32>(server, "service").unwrap();

    app.add_reaction(server, "first", move |_ctx| Ok(()))
        .with_trigger(service)
        .finish()
        .unwrap();

    let second = app
        .add_reaction(server, "second", move |_ctx| Ok(()))
        .with_trigger(service)
        .finish();
    assert!(second.is_err());
}

/// An unconnected caller port cannot be invoked.
#[test]
fn unbound_caller_is_an_error() {
    let mut app = App::new(
        "rpc_unbound",
        Config {
            fast: true,
            ..Default::default()
        },
    );
    let top = app.top();
    let client = app.add_reactor(top, "client").unwrap();
    let query = app.add_caller::<u32, u32>(client, "query").unwrap();

    app.add_reaction(client, "ask", move |ctx| {
        assert!(ctx.call(query, 1u32).is_err());
        Ok(())
    })
    .with_trigger(Trigger::Startup)
    .with_caller(query)
    .finish()
    .unwrap();

    app.run().unwrap();
}
