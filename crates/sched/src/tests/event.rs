use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::IDLE;
use crate::error::ScheduleError;
use crate::event::AsyncEvent;
use crate::handler::AsyncEventHandler;

fn counting(name: &str) -> (AsyncEventHandler, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let handler = {
        let count = count.clone();
        AsyncEventHandler::builder(name)
            .build(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
    };
    (handler, count)
}

#[test]
fn fire_releases_every_handler() {
    let event = AsyncEvent::new("button");
    let (first, first_count) = counting("first");
    let (second, second_count) = counting("second");
    event.add_handler(&first);
    event.add_handler(&second);
    event.add_handler(&first);
    assert_eq!(event.handler_count(), 2);

    event.fire().unwrap();
    event.fire().unwrap();
    assert!(first.wait_until_idle(IDLE));
    assert!(second.wait_until_idle(IDLE));
    assert_eq!(first_count.load(Ordering::SeqCst), 2);
    assert_eq!(second_count.load(Ordering::SeqCst), 2);
}

#[test]
fn handlers_can_be_replaced_and_removed() {
    let event = AsyncEvent::new("door");
    let (first, _) = counting("first");
    let (second, _) = counting("second");
    event.add_handler(&first);
    event.set_handler(Some(&second));
    assert!(!event.handled_by(&first));
    assert!(event.handled_by(&second));
    assert!(event.remove_handler(&second));
    assert!(!event.remove_handler(&second));
    event.set_handler(None);
    assert_eq!(event.handler_count(), 0);
    event.fire().unwrap();
}

#[test]
fn fire_reports_the_first_refusal() {
    let event = AsyncEvent::new("alarm");
    let (stopped, _) = counting("stopped");
    let (live, live_count) = counting("live");
    stopped.terminate();
    event.add_handler(&stopped);
    event.add_handler(&live);

    assert!(matches!(event.fire(), Err(ScheduleError::Terminated(_))));
    assert!(live.wait_until_idle(IDLE));
    assert_eq!(live_count.load(Ordering::SeqCst), 1);
}
