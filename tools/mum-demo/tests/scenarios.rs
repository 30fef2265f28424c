///
/// # Demo scenario tests
///
/// Runs each scenario against an in-memory sink and checks the printed lines.
///

use std::sync::Arc;

use mum_demo::{Capture, Scenario, THREAD_COUNT, run};

fn capture(scenario: Scenario) -> Vec<String> {
    let sink = Arc::new(Capture::default());
    run(scenario, sink.clone());
    sink.lines()
}

fn started(id: usize) -> String {
    format!("Thread #{} has started", id)
}

fn finished(id: usize) -> String {
    format!("Thread #{} has finished", id)
}

fn assert_every_thread_reported(lines: &[String]) {
    assert!(
        lines.iter().all(|line| !line.starts_with("WARNING")),
        "unexpected warnings: {:?}",
        lines
    );
    assert_eq!(lines.len(), THREAD_COUNT * 2);

    for id in 0..THREAD_COUNT {
        let start = lines.iter().position(|line| *line == started(id)).unwrap();
        let finish = lines.iter().position(|line| *line == finished(id)).unwrap();
        assert!(start < finish, "thread {} finished before starting", id);
    }
}

/// Under a lock each thread's two lines are adjacent.
fn assert_serialized(lines: &[String]) {
    for pair in lines.chunks(2) {
        let id: String = pair[0]
            .trim_start_matches("Thread #")
            .trim_end_matches(" has started")
            .to_string();
        assert_eq!(pair[0], format!("Thread #{} has started", id));
        assert_eq!(pair[1], format!("Thread #{} has finished", id));
    }
}

#[test]
fn test_threads_scenario() {
    let lines = capture(Scenario::Threads);
    assert_every_thread_reported(&lines);
}

#[test]
fn test_mutex_scenario() {
    let lines = capture(Scenario::Mutex);
    assert_every_thread_reported(&lines);
    assert_serialized(&lines);
}

#[test]
fn test_locking_scenario() {
    let lines = capture(Scenario::Locking);
    assert_every_thread_reported(&lines);
    assert_serialized(&lines);
}
