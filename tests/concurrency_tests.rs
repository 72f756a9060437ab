use rs2_pull::rs2::*;
use quickcheck::{quickcheck, TestResult};
use rand::{thread_rng, Rng};
use serial_test::serial;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::time::sleep;

fn expand(x: i32) -> RStream<(), i32> {
    from_iter(vec![x, x + 1, x * 2])
}

fn collect(stream: RStream<(), i32>) -> Vec<i32> {
    let rt = Runtime::new().unwrap();
    rt.block_on(stream.run_collect()).unwrap()
}

fn chunked(values: &[i16], size: usize) -> RStream<(), i32> {
    from_iter::<(), _>(values.iter().map(|v| *v as i32).collect::<Vec<_>>()).rechunk(size.max(1))
}

#[test]
#[serial]
fn prop_flat_map_left_identity() {
    fn prop(a: i16) -> bool {
        let a = a as i32;
        collect(emit(a).flat_map(expand)) == collect(expand(a))
    }
    quickcheck(prop as fn(i16) -> bool);
}

#[test]
#[serial]
fn prop_flat_map_right_identity() {
    fn prop(values: Vec<i16>, size: u8) -> bool {
        let stream = chunked(&values, size as usize);
        collect(stream.clone().flat_map(emit)) == collect(stream)
    }
    quickcheck(prop as fn(Vec<i16>, u8) -> bool);
}

#[test]
#[serial]
fn prop_flat_map_associativity() {
    fn prop(values: Vec<i16>) -> bool {
        let stream = chunked(&values, 3);
        let g = |x: i32| -> RStream<(), i32> { if x % 2 == 0 { emit(x) } else { empty() } };
        let left = stream.clone().flat_map(expand).flat_map(g);
        let right = stream.flat_map(move |x| expand(x).flat_map(g));
        collect(left) == collect(right)
    }
    quickcheck(prop as fn(Vec<i16>) -> bool);
}

#[test]
#[serial]
fn prop_flat_map_par_one_is_flat_map() {
    fn prop(values: Vec<i16>) -> bool {
        let stream = chunked(&values, 4);
        collect(stream.clone().flat_map_par(1, expand)) == collect(stream.flat_map(expand))
    }
    quickcheck(prop as fn(Vec<i16>) -> bool);
}

#[test]
#[serial]
fn prop_flat_map_par_preserves_elements() {
    fn prop(values: Vec<i16>, n: u8) -> TestResult {
        if n == 0 {
            return TestResult::discard();
        }
        let stream = chunked(&values, 2);
        let mut parallel = collect(stream.clone().flat_map_par(n as usize, expand));
        let mut sequential = collect(stream.flat_map(expand));
        parallel.sort_unstable();
        sequential.sort_unstable();
        TestResult::from_bool(parallel == sequential)
    }
    quickcheck(prop as fn(Vec<i16>, u8) -> TestResult);
}

#[test]
#[serial]
fn prop_zip_all_matches_padded_lists() {
    fn prop(left: Vec<i16>, right: Vec<i16>) -> bool {
        let rt = Runtime::new().unwrap();
        let zipped = rt
            .block_on(
                chunked(&left, 3)
                    .zip_all(chunked(&right, 5), -1, -2)
                    .run_collect(),
            )
            .unwrap();
        let len = left.len().max(right.len());
        let expected: Vec<(i32, i32)> = (0..len)
            .map(|i| {
                (
                    left.get(i).map_or(-1, |v| *v as i32),
                    right.get(i).map_or(-2, |v| *v as i32),
                )
            })
            .collect();
        zipped == expected
    }
    quickcheck(prop as fn(Vec<i16>, Vec<i16>) -> bool);
}

#[tokio::test]
#[serial]
async fn test_flat_map_par_limits_concurrency() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&running);
    let p = Arc::clone(&peak);
    let stream = range::<()>(0, 20).flat_map_par(3, move |x| {
        let running = Arc::clone(&r);
        let peak = Arc::clone(&p);
        eval(move || {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let delay = thread_rng().gen_range(2..8);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(delay)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(x)
            }
        })
    });
    let mut result = stream.run_collect().await.unwrap();
    result.sort_unstable();
    assert_eq!(result, (0..20).collect::<Vec<_>>());
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(peak.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
#[serial]
async fn test_failure_interrupts_running_siblings() {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    let stream = from_iter::<&str, _>(vec![0, 1]).flat_map_par(2, move |x| {
        if x == 0 {
            let flag = Arc::clone(&flag);
            never::<&str, i32>().on_interrupt(move || {
                flag.store(true, Ordering::SeqCst);
                async {}
            })
        } else {
            eval(|| async {
                sleep(Duration::from_millis(20)).await;
                Err("inner failed")
            })
        }
    });
    assert_eq!(stream.run_collect().await, Err(Cause::Fail("inner failed")));
    assert!(interrupted.load(Ordering::SeqCst));
}

#[tokio::test]
#[serial]
async fn test_outer_failure_after_inner_output() {
    let stream = from_iter::<&str, _>(vec![1, 2])
        .concat(fail("outer"))
        .flat_map_par(4, |x| emit(x * 10));
    assert_eq!(stream.run_collect().await, Err(Cause::Fail("outer")));
}

#[tokio::test]
#[serial]
async fn test_flat_map_par_switch_interrupts_oldest() {
    let cancelled = Arc::new(Mutex::new(Vec::new()));
    let c = Arc::clone(&cancelled);
    let stream = range::<()>(0, 3).rechunk(1).flat_map_par_switch(1, move |x| {
        let c = Arc::clone(&c);
        let slow = eval(move || async move {
            sleep(Duration::from_millis(if x == 2 { 0 } else { 200 })).await;
            Ok(x)
        });
        slow.on_interrupt(move || {
            c.lock().unwrap().push(x);
            async {}
        })
    });
    assert_eq!(stream.run_collect().await.unwrap(), vec![2]);
    assert_eq!(*cancelled.lock().unwrap(), vec![0, 1]);
}

#[tokio::test]
#[serial]
async fn test_merge_interleaves_both_sides() {
    let left = range::<()>(0, 50).rechunk(5);
    let right = range::<()>(100, 150).rechunk(5);
    let mut merged = left.merge(right).run_collect().await.unwrap();
    merged.sort_unstable();
    let expected: Vec<i32> = (0..50).chain(100..150).collect();
    assert_eq!(merged, expected);
}

#[tokio::test]
#[serial]
async fn test_merge_failure_wins() {
    let stream = never::<&str, i32>().merge(fail("right side"));
    assert_eq!(stream.run_collect().await, Err(Cause::Fail("right side")));
}

#[tokio::test]
#[serial]
async fn test_merge_either_tags_sides() {
    let merged = from_iter::<(), _>(vec![1, 2])
        .merge_either(from_iter(vec!["a"]))
        .run_collect()
        .await
        .unwrap();
    let lefts: Vec<i32> = merged
        .iter()
        .filter_map(|e| match e {
            Either::Left(x) => Some(*x),
            Either::Right(_) => None,
        })
        .collect();
    let rights: Vec<&str> = merged
        .iter()
        .filter_map(|e| match e {
            Either::Left(_) => None,
            Either::Right(s) => Some(*s),
        })
        .collect();
    assert_eq!(lefts, vec![1, 2]);
    assert_eq!(rights, vec!["a"]);
}

#[tokio::test]
#[serial]
async fn test_merge_terminate_strategies() {
    let finished = range::<()>(0, 3).merge_terminate_either(never()).run_count().await.unwrap();
    assert_eq!(finished, 3);

    let right = never::<(), i32>().merge_terminate_right(range(0, 2)).run_collect().await.unwrap();
    assert_eq!(right, vec![0, 1]);
}

#[tokio::test]
#[serial]
async fn test_parallel_stream_in_fiber_is_interrupted_with_scope() {
    let released = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&released);
    let stream = range::<()>(0, 4).flat_map_par(4, move |_| {
        let r = Arc::clone(&r);
        never::<(), i32>().ensuring(move || {
            r.fetch_add(1, Ordering::SeqCst);
            async {}
        })
    });
    let scope = Scope::new();
    let _fiber = Fiber::fork(&scope, move |_| async move {
        let _ = stream.run_drain().await;
    });
    sleep(Duration::from_millis(30)).await;
    scope.close(ExitCase::Interrupted).await;
    assert_eq!(released.load(Ordering::SeqCst), 4);
}
