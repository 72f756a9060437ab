use futures_util::stream::StreamExt;
use rs2_pull::rs2::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(Debug, Clone, PartialEq)]
enum AppError {
    NotFound(String),
    Invalid(i32),
}

#[test]
fn test_catch_all_recovers_from_failure() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        // Fail after two elements, then switch to the fallback stream
        let stream = from_iter::<AppError, _>(vec![1, 2])
            .concat(fail(AppError::Invalid(3)))
            .catch_all::<AppError, _>(|error| match error {
                AppError::Invalid(n) => emit(n * 10),
                other => fail(other),
            });

        let result = stream.run_collect().await.unwrap();
        assert_eq!(result, vec![1, 2, 30]);
    });
}

#[tokio::test]
async fn test_catch_all_leaves_defects_alone() {
    let handled = Arc::new(AtomicBool::new(false));
    let h = Arc::clone(&handled);
    let stream = die::<AppError, i32>("broken state").catch_all::<AppError, _>(move |_| {
        h.store(true, Ordering::SeqCst);
        emit(0)
    });
    let result = stream.run_collect().await;
    assert!(result.unwrap_err().is_die());
    assert!(!handled.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_catch_all_cause_sees_defects() {
    let stream = die::<AppError, i32>("broken").catch_all_cause::<AppError, _>(|cause| {
        let message = cause.defect().map(|d| d.message().to_string()).unwrap_or_default();
        emit(message.len() as i32)
    });
    assert_eq!(stream.run_collect().await.unwrap(), vec![6]);
}

#[tokio::test]
async fn test_catch_all_cause_passes_interrupt() {
    let stream = halt::<AppError, i32>(Cause::Interrupt).catch_all_cause::<AppError, _>(|_| emit(1));
    assert_eq!(stream.run_collect().await, Err(Cause::Interrupt));
}

#[tokio::test]
async fn test_handler_stream_can_fail() {
    let stream = fail::<&str, i32>("first")
        .catch_all::<&str, _>(|e| fail(if e == "first" { "second" } else { "other" }));
    assert_eq!(stream.run_collect().await, Err(Cause::Fail("second")));
}

#[tokio::test]
async fn test_failed_stream_released_before_recovery() {
    let released = Arc::new(AtomicBool::new(false));
    let r = Arc::clone(&released);
    let seen_released = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&seen_released);
    let stream = fail::<&str, bool>("bad")
        .ensuring(move || {
            r.store(true, Ordering::SeqCst);
            async {}
        })
        .catch_all::<&str, _>(move |_| {
            let released = Arc::clone(&released);
            let seen = Arc::clone(&seen);
            eval(move || {
                let value = released.load(Ordering::SeqCst);
                seen.store(value, Ordering::SeqCst);
                async move { Ok(value) }
            })
        });
    assert_eq!(stream.run_collect().await.unwrap(), vec![true]);
    assert!(seen_released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_map_error() {
    let stream = fail::<&str, i32>("missing").map_error(|e| AppError::NotFound(e.to_string()));
    assert_eq!(
        stream.run_collect().await,
        Err(Cause::Fail(AppError::NotFound("missing".to_string())))
    );

    let defect = die::<&str, i32>("kept").map_error(|_| AppError::Invalid(0));
    assert_eq!(defect.run_collect().await, Err(Cause::die("kept")));
}

#[tokio::test]
async fn test_map_error_cause() {
    let stream = die::<&str, i32>("boom").map_error_cause(|cause| match cause {
        Cause::Die(d) => Cause::Fail(d.message().len()),
        other => other.map(|e| e.len()),
    });
    assert_eq!(stream.run_collect().await, Err(Cause::Fail(4)));
}

#[tokio::test]
async fn test_or_else() {
    let primary = from_iter::<&str, _>(vec![1, 2]).concat(fail("down"));
    let result = primary.or_else::<()>(from_iter(vec![10, 20])).run_collect().await.unwrap();
    assert_eq!(result, vec![1, 2, 10, 20]);
}

#[tokio::test]
async fn test_either_and_absolve() {
    let stream = from_iter::<&str, _>(vec![1, 2]).concat(fail("stop"));
    let as_values = stream.clone().either::<()>().run_collect().await.unwrap();
    assert_eq!(as_values, vec![Ok(1), Ok(2), Err("stop")]);

    let round_trip = stream.either::<&str>().absolve().run_collect().await;
    assert_eq!(round_trip, Err(Cause::Fail("stop")));

    let values = from_iter::<&str, _>(vec![Ok(1), Ok(2), Err("bad"), Ok(4)])
        .absolve()
        .into_stream()
        .collect::<Vec<_>>()
        .await;
    assert_eq!(values, vec![Ok(1), Ok(2), Err(Cause::Fail("bad"))]);
}

#[tokio::test]
async fn test_failure_stops_further_pulls() {
    let evaluated = Arc::new(AtomicUsize::new(0));
    let e = Arc::clone(&evaluated);
    let stream = fail::<&str, usize>("early").concat(eval(move || {
        e.fetch_add(1, Ordering::SeqCst);
        async { Ok(0) }
    }));
    assert!(stream.run_collect().await.is_err());
    assert_eq!(evaluated.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_die_propagates_through_combinators() {
    let stream = range::<&str>(0, 10)
        .flat_map(|x| if x == 5 { die("five") } else { emit(x) })
        .map(|x| x * 2)
        .filter(|x| x % 4 == 0)
        .take(100);
    assert_eq!(stream.run_collect().await, Err(Cause::die("five")));
}

#[tokio::test]
async fn test_panic_in_flat_map_function() {
    let stream = range::<()>(0, 3).flat_map(|x| {
        if x == 1 {
            panic!("cannot expand {}", x);
        }
        emit(x)
    });
    let cause = stream.run_collect().await.unwrap_err();
    assert_eq!(cause.defect().map(|d| d.message()), Some("cannot expand 1"));
}

#[tokio::test]
async fn test_eval_failure_inside_flat_map() {
    let stream = range::<String>(0, 4).flat_map(|x| {
        eval(move || async move {
            if x == 2 {
                Err(format!("lookup {} failed", x))
            } else {
                Ok(x)
            }
        })
    });
    let items = stream.into_stream().collect::<Vec<_>>().await;
    assert_eq!(
        items,
        vec![Ok(0), Ok(1), Err(Cause::Fail("lookup 2 failed".to_string()))]
    );
}
