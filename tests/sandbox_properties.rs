//! Pipeline-level guarantees that hold for every submission.

use learnbox::config::descriptor::{PolicyDescriptor, DEFAULT_FORBIDDEN_IDENTIFIERS};
use learnbox::core::governor::ThreadGovernor;
use learnbox::verdict::classifier::{MEMORY_LIMIT_DIAGNOSTIC, TIME_LIMIT_DIAGNOSTIC};
use learnbox::{CodeSubmission, OutcomeKind, Sandbox};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn sandbox(policy: PolicyDescriptor) -> Sandbox {
    Sandbox::new(policy, Arc::new(ThreadGovernor::new()))
}

fn submit(sandbox: &Sandbox, code: &str) -> learnbox::ExecutionOutcome {
    sandbox.submit(CodeSubmission::new(code)).unwrap()
}

#[test]
fn test_forbidden_words_never_reach_the_runtime() {
    let sandbox = sandbox(PolicyDescriptor::default());
    for word in DEFAULT_FORBIDDEN_IDENTIFIERS {
        let outcome = submit(&sandbox, &format!("x = 1\n{} = 2", word));
        assert_eq!(outcome.kind, OutcomeKind::Blocked, "{word}");
        assert!(outcome.diagnostic.unwrap().contains(word));
    }
    assert_eq!(sandbox.metrics().runtime_invocations.get(), 0);
}

#[test]
fn test_forbidden_words_in_strings_and_comments_are_fine() {
    let sandbox = sandbox(PolicyDescriptor::default());
    let outcome = submit(&sandbox, "print('import os')  # eval is not called");
    assert_eq!(outcome.kind, OutcomeKind::Success);
    assert_eq!(outcome.output_text, "import os");
}

#[test]
fn test_operations_outside_the_policy_do_not_exist() {
    let narrow = sandbox(PolicyDescriptor::default().with_operations(["print"]));
    let outcome = submit(&narrow, "print(len([1, 2]))");
    assert_eq!(outcome.kind, OutcomeKind::RuntimeFault);
    assert!(outcome.diagnostic.unwrap().starts_with("NameError"));

    let wide = sandbox(PolicyDescriptor::default());
    assert_eq!(submit(&wide, "print(len([1, 2]))").output_text, "2");
}

#[test]
fn test_output_never_exceeds_the_cap() {
    let limit = 256;
    let sandbox = sandbox(PolicyDescriptor {
        max_output_bytes: limit,
        ..Default::default()
    });
    let outcome = submit(&sandbox, &format!("print('z' * {})", limit + 1000));
    assert_eq!(outcome.kind, OutcomeKind::Success);
    assert!(outcome.truncated);
    assert!(outcome.output_text.len() <= limit);

    let small = submit(&sandbox, "for i in range(3):\n    print(i)\n");
    assert!(!small.truncated);
    assert_eq!(small.output_text, "0\n1\n2");
}

#[test]
fn test_multibyte_character_at_the_cap_is_truncation() {
    let sandbox = sandbox(PolicyDescriptor {
        max_output_bytes: 10,
        ..Default::default()
    });
    let outcome = submit(&sandbox, "print('aaaaaaaaa\u{20ac}', end='')");
    assert_eq!(outcome.kind, OutcomeKind::Success);
    assert!(outcome.truncated);
    assert_eq!(outcome.output_text, "aaaaaaaaa");
}

#[test]
fn test_nothing_is_printed_after_truncation() {
    let sandbox = sandbox(PolicyDescriptor {
        max_output_bytes: 10,
        ..Default::default()
    });
    let code = "print('aaaaaaaaa\u{e9}', end='')\nprint('b', end='')\nprint('later')";
    let outcome = submit(&sandbox, code);
    assert!(outcome.truncated);
    assert_eq!(outcome.output_text, "aaaaaaaaa");

    let code = "print('x' * 20)\nprint('tail')";
    let outcome = submit(&sandbox, code);
    assert!(outcome.truncated);
    assert_eq!(outcome.output_text, "x".repeat(10));
}

#[test]
fn test_comparing_shared_structures_stops_near_the_ceiling() {
    let ceiling = Duration::from_millis(200);
    let sandbox = sandbox(PolicyDescriptor {
        max_wall_clock_millis: ceiling.as_millis() as u64,
        ..Default::default()
    });
    let trees = "a = [0]\nb = [0]\nfor i in range(40):\n    a = [a, a]\n    b = [b, b]\n";
    for check in ["print(a == b)", "print(a < b)", "print(a in [b])", "print(max([a, b]))"] {
        let started = Instant::now();
        let outcome = submit(&sandbox, &format!("{trees}{check}"));
        let elapsed = started.elapsed();
        assert_eq!(outcome.kind, OutcomeKind::ResourceExceeded, "{check}");
        assert_eq!(outcome.diagnostic.as_deref(), Some(TIME_LIMIT_DIAGNOSTIC));
        assert!(elapsed < ceiling + Duration::from_secs(2), "{check} took {elapsed:?}");
    }
    assert!(submit(&sandbox, "print([[1]] == [[1]])").is_success());
}

#[test]
fn test_repeating_an_empty_list_is_not_a_resource_problem() {
    let sandbox = sandbox(PolicyDescriptor {
        max_wall_clock_millis: 200,
        ..Default::default()
    });
    let outcome = submit(&sandbox, "print(len([] * 10**18))");
    assert_eq!(outcome.kind, OutcomeKind::Success);
    assert_eq!(outcome.output_text, "0");
}

#[test]
fn test_infinite_loop_stops_near_the_ceiling() {
    let ceiling = Duration::from_millis(200);
    let sandbox = sandbox(PolicyDescriptor {
        max_wall_clock_millis: ceiling.as_millis() as u64,
        ..Default::default()
    });
    let started = Instant::now();
    let outcome = submit(&sandbox, "while True: pass");
    let elapsed = started.elapsed();

    assert_eq!(outcome.kind, OutcomeKind::ResourceExceeded);
    assert_eq!(outcome.diagnostic.as_deref(), Some(TIME_LIMIT_DIAGNOSTIC));
    assert!(elapsed >= ceiling);
    assert!(elapsed < ceiling + Duration::from_secs(2), "took {elapsed:?}");
}

#[test]
fn test_memory_ceiling() {
    let sandbox = sandbox(PolicyDescriptor {
        max_memory_bytes: 1024 * 1024,
        ..Default::default()
    });
    let outcome = submit(&sandbox, "x = 'a' * 10000000");
    assert_eq!(outcome.kind, OutcomeKind::ResourceExceeded);
    assert_eq!(outcome.diagnostic.as_deref(), Some(MEMORY_LIMIT_DIAGNOSTIC));

    let growing = submit(&sandbox, "xs = [0]\nwhile True:\n    xs = xs + xs\n");
    assert_eq!(growing.kind, OutcomeKind::ResourceExceeded);
}

#[test]
fn test_same_submission_same_outcome() {
    let sandbox = sandbox(PolicyDescriptor::default());
    let code = "total = 0\nfor i in range(10):\n    total += i * i\nprint(total)\n";
    let first = submit(&sandbox, code);
    let second = submit(&sandbox, code);
    assert_eq!(first, second);
    assert_eq!(first.output_text, "285");

    let fault = "print(1 / 0)";
    assert_eq!(submit(&sandbox, fault), submit(&sandbox, fault));
}

#[test]
fn test_runs_do_not_share_state() {
    let sandbox = sandbox(PolicyDescriptor::default());
    assert!(submit(&sandbox, "leftover = 5").is_success());
    let outcome = submit(&sandbox, "print(leftover)");
    assert_eq!(outcome.kind, OutcomeKind::RuntimeFault);
}

#[test]
fn test_concurrent_submissions() {
    let sandbox = Arc::new(sandbox(PolicyDescriptor::default()));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let sandbox = Arc::clone(&sandbox);
            std::thread::spawn(move || submit(&sandbox, &format!("print({} * 2)", i)))
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap().output_text, (i * 2).to_string());
    }
    assert_eq!(sandbox.metrics().outcomes_success.get(), 8);
    assert_eq!(sandbox.metrics().active_executions.get(), 0);
}
