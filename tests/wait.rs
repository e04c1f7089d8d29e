use embra::event::{update_cmd, wait_cmd};
use embra::prelude::*;
use embra::value::list;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

fn args(words: &[&str]) -> Vec<Value> {
    words.iter().map(|w| Value::string(*w)).collect()
}

#[test]
fn timeout_alone_returns_minus_one() {
    let mut interp = Interp::new();
    let started = Instant::now();
    let result = wait_cmd(&mut interp, &args(&["-variable", "v", "-timeout", "50"]))
        .expect("wait");
    assert!(started.elapsed().as_millis() >= 50);
    assert_eq!(result.get_int().expect("int"), -1);
}

#[test]
fn variable_write_completes_the_wait() {
    let mut interp = Interp::new();
    interp
        .notifier()
        .borrow_mut()
        .create_timer(20, |interp| interp.set_var("v", Value::int(1)));

    let result = wait_cmd(
        &mut interp,
        &args(&["-variable", "v", "-timeout", "2000", "-extended"]),
    )
    .expect("wait");

    let items = list::all_elements(&result);
    assert_eq!(items[0].get_string(), "variable");
    assert_eq!(items[1].get_string(), "v");
    assert_eq!(items[2].get_string(), "timeleft");
    let left = items[3].get_int().expect("timeleft");
    assert!((0..=1990).contains(&left), "timeleft was {left}");
}

#[test]
fn all_mode_requires_every_source() {
    let mut interp = Interp::new();
    {
        let notifier = interp.notifier();
        let mut notifier = notifier.borrow_mut();
        notifier.create_timer(10, |interp| interp.set_var("a", Value::int(1)));
        notifier.create_timer(30, |interp| interp.set_var("b", Value::int(2)));
    }

    let result = wait_cmd(
        &mut interp,
        &args(&["-all", "-extended", "-variable", "a", "-variable", "b"]),
    )
    .expect("wait");

    // Both sources fired, in delivery order.
    let items = list::all_elements(&result);
    assert_eq!(items.len(), 4);
    assert_eq!(items[1].get_string(), "a");
    assert_eq!(items[3].get_string(), "b");
}

#[test]
fn readable_channel_fires() {
    let mut interp = Interp::new();
    let chan = Rc::new(RefCell::new(ByteChannel::new("pipe")));
    chan.borrow_mut().write(b"ready").expect("seed");
    interp.register_channel("pipe", chan);

    let result = wait_cmd(&mut interp, &args(&["-readable", "pipe", "-extended"]))
        .expect("wait");
    assert_eq!(result.get_string(), "readable pipe");
}

#[test]
fn legacy_form_waits_on_one_variable() {
    let mut interp = Interp::new();
    interp
        .notifier()
        .borrow_mut()
        .create_timer(5, |interp| interp.set_var("flag", Value::int(1)));
    let result = wait_cmd(&mut interp, &args(&["flag"])).expect("wait");
    assert_eq!(result.get_string(), "");
}

#[test]
fn validation_errors() {
    let mut interp = Interp::new();
    let chan = Rc::new(RefCell::new(ByteChannel::new("pipe")));
    interp.register_channel("pipe", chan);

    let cases: Vec<(&[&str], fn(&RuntimeError) -> bool)> = vec![
        (
            &[
                "-nofileevents",
                "-noidleevents",
                "-notimerevents",
                "-nowindowevents",
            ],
            |e| matches!(e, RuntimeError::WaitNoSources),
        ),
        (&["-notimerevents", "-timeout", "10"], |e| {
            matches!(e, RuntimeError::WaitNoTime)
        }),
        (&["-nofileevents", "-readable", "pipe"], |e| {
            matches!(e, RuntimeError::WaitNoFileEvent)
        }),
        (&["-timeout", "-5"], |e| {
            matches!(e, RuntimeError::WaitNegativeTime)
        }),
        (&["-readable", "nosuch"], |e| {
            matches!(e, RuntimeError::IoUnknownChannel(_))
        }),
    ];
    for (words, check) in cases {
        let err = wait_cmd(&mut interp, &args(words)).expect_err("must fail");
        assert!(check(&err), "unexpected error for {words:?}: {err}");
    }
}

#[test]
fn wait_without_sources_errors() {
    let mut interp = Interp::new();
    let err = wait_cmd(&mut interp, &args(&["-variable", "never"])).expect_err("forever");
    assert!(matches!(err, RuntimeError::WaitNoSources));
}

#[test]
fn degenerate_wait_is_one_pass() {
    let mut interp = Interp::new();
    let ran = Rc::new(RefCell::new(false));
    let flag = ran.clone();
    interp
        .notifier()
        .borrow_mut()
        .do_when_idle(move |_| *flag.borrow_mut() = true);
    interp.set_result(Value::string("leftover"));

    let result = wait_cmd(&mut interp, &[]).expect("wait");
    assert_eq!(result.get_string(), "");
    assert!(*ran.borrow(), "idle handler must run");
    assert_eq!(interp.result().get_string(), "");
}

#[test]
fn cancellation_unwinds_the_wait() {
    let mut interp = Interp::new();
    interp.cancel();
    let err = wait_cmd(&mut interp, &args(&["-variable", "v", "-timeout", "1000"]))
        .expect_err("cancelled");
    assert!(matches!(err, RuntimeError::Cancelled));
}

#[test]
fn limit_unwinds_the_wait() {
    let mut interp = Interp::new();
    interp.set_limit_exceeded(true);
    let err = wait_cmd(&mut interp, &args(&["-variable", "v", "-timeout", "1000"]))
        .expect_err("limited");
    assert!(matches!(err, RuntimeError::LimitExceeded));
}

#[test]
fn registered_commands_cover_wait_and_update() {
    let mut interp = Interp::new();
    register_event_commands(&mut interp);
    let outcome = interp
        .eval_global(&args(&["update"]))
        .expect("update command");
    assert!(matches!(outcome, Flow::Normal(_)));
}

fn fail_with(interp: &mut Interp, message: &str) {
    let words = vec![Value::string("boom"), Value::string(message)];
    let outcome = interp.eval_global(&words);
    assert!(outcome.is_err());
    report_background_error(interp, &outcome);
}

fn setup_failing_interp() -> (Interp, Rc<RefCell<Vec<(String, String)>>>) {
    let mut interp = Interp::new();
    interp.register_command("boom", |_, args| {
        Err(RuntimeError::BadArgument(
            args.first().map(|a| a.get_string().to_string()).unwrap_or_default(),
        ))
    });
    let seen: Rc<RefCell<Vec<(String, String)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    interp.register_command("bgerror", move |_, args| {
        sink.borrow_mut().push((
            args[0].get_string().to_string(),
            args[1].get_string().to_string(),
        ));
        Ok(Flow::Normal(Value::empty()))
    });
    (interp, seen)
}

#[test]
fn background_errors_drain_in_fifo_order() {
    let (mut interp, seen) = setup_failing_interp();
    fail_with(&mut interp, "A");
    fail_with(&mut interp, "B");
    assert!(seen.borrow().is_empty(), "drain waits for idle time");

    update_cmd(&mut interp, &[]).expect("update");

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, "A");
    assert_eq!(seen[1].0, "B");
    assert!(seen[0].1.contains("-code error"), "options were {}", seen[0].1);
}

#[test]
fn break_discards_remaining_reports() {
    let mut interp = Interp::new();
    interp.register_command("boom", |_, args| {
        Err(RuntimeError::BadArgument(args[0].get_string().to_string()))
    });
    let count = Rc::new(RefCell::new(0));
    let sink = count.clone();
    interp.register_command("bgerror", move |_, _| {
        *sink.borrow_mut() += 1;
        Ok(Flow::Break)
    });
    fail_with(&mut interp, "first");
    fail_with(&mut interp, "second");
    update_cmd(&mut interp, &[]).expect("update");
    assert_eq!(*count.borrow(), 1, "break cancels the rest of the queue");
}

#[test]
fn missing_handler_reports_to_error_stream() {
    let mut interp = Interp::new();
    interp.register_command("boom", |_, args| {
        Err(RuntimeError::BadArgument(args[0].get_string().to_string()))
    });
    let stream: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    interp.set_error_stream(stream.clone());

    fail_with(&mut interp, "unhandled");
    update_cmd(&mut interp, &[]).expect("update");

    let text = String::from_utf8(stream.borrow().clone()).expect("utf8");
    assert!(text.contains("unhandled"), "stream was {text:?}");
}

#[test]
fn sandboxed_handler_failure_uses_hidden_fallback() {
    let mut interp = Interp::new();
    interp.set_safe(true);
    interp.register_command("boom", |_, args| {
        Err(RuntimeError::BadArgument(args[0].get_string().to_string()))
    });
    interp.register_command("bgerror", |_, _| {
        Err(RuntimeError::BadArgument("handler broke".to_string()))
    });
    let hidden: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = hidden.clone();
    interp.register_command("bgerror-hidden", move |_, args| {
        sink.borrow_mut().push(args[0].get_string().to_string());
        Ok(Flow::Normal(Value::empty()))
    });
    let stream: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    interp.set_error_stream(stream.clone());

    fail_with(&mut interp, "contained");
    update_cmd(&mut interp, &[]).expect("update");

    assert_eq!(hidden.borrow().as_slice(), ["contained".to_string()]);
    assert!(stream.borrow().is_empty(), "sandboxed errors stay silent");
}

#[test]
fn handler_can_install_another_handler() {
    let mut interp = Interp::new();
    interp.register_command("boom", |_, args| {
        Err(RuntimeError::BadArgument(args[0].get_string().to_string()))
    });
    let order: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = order.clone();
    interp.register_command("second", move |_, args| {
        sink.borrow_mut().push(format!("second:{}", args[0].get_string()));
        Ok(Flow::Normal(Value::empty()))
    });
    let sink = order.clone();
    interp.register_command("bgerror", move |interp, args| {
        sink.borrow_mut().push(format!("first:{}", args[0].get_string()));
        set_background_error_handler(interp, vec![Value::string("second")]);
        Ok(Flow::Normal(Value::empty()))
    });

    fail_with(&mut interp, "A");
    fail_with(&mut interp, "B");
    update_cmd(&mut interp, &[]).expect("update");

    assert_eq!(
        order.borrow().as_slice(),
        ["first:A".to_string(), "second:B".to_string()]
    );
}
