use futures_util::stream::StreamExt;
use rs2_pull::rs2::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Runtime;

#[test]
fn test_emit() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let stream: RStream<(), i32> = emit(42);
        let result = stream.run_collect().await.unwrap();
        assert_eq!(result, vec![42]);
    });
}

#[test]
fn test_empty() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let stream = empty::<(), i32>();
        let result = stream.run_collect().await.unwrap();
        assert_eq!(result, Vec::<i32>::new());
    });
}

#[test]
fn test_from_iter() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let stream = from_iter::<(), _>(vec![1, 2, 3, 4, 5]);
        let result = stream.run_collect().await.unwrap();
        assert_eq!(result, vec![1, 2, 3, 4, 5]);
    });
}

#[tokio::test]
async fn test_streams_are_rerunnable() {
    let evaluations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&evaluations);
    let stream: RStream<(), usize> = eval(move || {
        let counter = Arc::clone(&counter);
        async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
    });
    assert_eq!(stream.clone().run_collect().await.unwrap(), vec![0]);
    assert_eq!(stream.run_collect().await.unwrap(), vec![1]);
    assert_eq!(evaluations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_eval_failure() {
    let stream: RStream<String, i32> = eval(|| async { Err("no value".to_string()) });
    assert_eq!(stream.run_collect().await, Err(Cause::Fail("no value".to_string())));
}

#[tokio::test]
async fn test_unfold_and_iterate() {
    let fibonacci = unfold::<(), _, _, _>((0u64, 1u64), |(a, b)| Some((a, (b, a + b))));
    assert_eq!(
        fibonacci.take(10).run_collect().await.unwrap(),
        vec![0, 1, 1, 2, 3, 5, 8, 13, 21, 34]
    );

    let powers = iterate::<(), _, _>(1u32, |x| x * 2);
    assert_eq!(powers.take(5).run_collect().await.unwrap(), vec![1, 2, 4, 8, 16]);
}

#[tokio::test]
async fn test_unfold_eval_stops_on_error() {
    let stream = unfold_eval(0, |n| async move {
        if n == 3 {
            Err("three")
        } else {
            Ok(Some((n, n + 1)))
        }
    });
    let result: Vec<_> = stream.into_stream().collect().await;
    assert_eq!(result, vec![Ok(0), Ok(1), Ok(2), Err(Cause::Fail("three"))]);
}

#[tokio::test]
async fn test_runners() {
    let stream = range::<()>(1, 11);
    assert_eq!(stream.clone().run_count().await.unwrap(), 10);
    assert_eq!(stream.clone().run_head().await.unwrap(), Some(1));
    assert_eq!(stream.clone().run_last().await.unwrap(), Some(10));
    assert_eq!(stream.clone().run_fold(0, |acc, x| acc + x).await.unwrap(), 55);
    assert_eq!(
        stream.clone().run_fold_while(0, |acc| *acc < 10, |acc, x| acc + x).await.unwrap(),
        10
    );

    let seen = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&seen);
    stream
        .run_for_each(move |x| {
            s.fetch_add(x as usize, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 55);
}

#[tokio::test]
async fn test_run_head_does_not_pull_further() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let p = Arc::clone(&pulled);
    let stream = range::<()>(0, 100).rechunk(1).tap(move |_| {
        p.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    });
    assert_eq!(stream.run_head().await.unwrap(), Some(0));
    assert_eq!(pulled.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transformations() {
    let result = range::<()>(0, 20)
        .map(|x| x * 3)
        .filter(|x| x % 2 == 0)
        .drop(1)
        .take_while(|x| *x < 40)
        .run_collect()
        .await
        .unwrap();
    assert_eq!(result, vec![6, 12, 18, 24, 30, 36]);

    let until = range::<()>(0, 10).take_until(|x| *x == 3).run_collect().await.unwrap();
    assert_eq!(until, vec![0, 1, 2, 3]);

    let scanned = from_iter::<(), _>(vec![1, 2, 3]).scan(0, |acc, x| acc + x).run_collect().await.unwrap();
    assert_eq!(scanned, vec![0, 1, 3, 6]);

    let indexed = from_iter::<(), _>(vec!['a', 'b']).zip_with_index().run_collect().await.unwrap();
    assert_eq!(indexed, vec![('a', 0), ('b', 1)]);
}

#[tokio::test]
async fn test_take_stops_upstream() {
    let first = range::<()>(0, 3).concat(die("should not be reached"));
    assert_eq!(first.take(3).run_collect().await.unwrap(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_zip() {
    let left = from_chunks::<(), _, _>(vec![Chunk::from(vec![1, 2, 3]), Chunk::from(vec![4])]);
    let right = from_iter::<(), _>(vec!["a", "b"]);
    let zipped = left.clone().zip(right.clone()).run_collect().await.unwrap();
    assert_eq!(zipped, vec![(1, "a"), (2, "b")]);

    let padded = left.zip_all(right, 0, "-").run_collect().await.unwrap();
    assert_eq!(padded, vec![(1, "a"), (2, "b"), (3, "-"), (4, "-")]);
}

#[tokio::test]
async fn test_interrupt_when() {
    let signal = Promise::new();
    let trigger = signal.clone();
    let stream = range::<()>(0, 3)
        .rechunk(1)
        .tap(move |x| {
            if *x == 1 {
                trigger.complete(());
            }
            async { Ok(()) }
        })
        .concat(never())
        .interrupt_when(signal);
    let result = stream.run_collect().await.unwrap();
    assert!(result.len() <= 3);
    assert_eq!(&result[..2], &[0, 1]);
}

#[tokio::test]
async fn test_pull_termination_is_idempotent() {
    let scope = Scope::new();
    let mut pull = fail::<&str, i32>("boom").open(&scope);
    assert_eq!(pull.pull().await, Take::Fail(Cause::Fail("boom")));
    assert_eq!(pull.pull().await, Take::Fail(Cause::Fail("boom")));

    let mut pull = from_iter::<&str, _>(vec![1]).open(&scope);
    assert_eq!(pull.pull().await, Take::Chunk(Chunk::single(1)));
    assert_eq!(pull.pull().await, Take::End);
    assert_eq!(pull.pull().await, Take::End);
    scope.close(ExitCase::Completed).await;
}

#[tokio::test]
async fn test_deep_concat_is_stack_safe() {
    let mut stream = empty::<(), usize>();
    for i in 0..10_000 {
        stream = stream.concat(emit(i));
    }
    assert_eq!(stream.run_count().await.unwrap(), 10_000);

    let right_nested = (0..10_000).rev().fold(empty::<(), usize>(), |acc, i| emit(i).concat(acc));
    assert_eq!(right_nested.run_last().await.unwrap(), Some(9_999));
}

fn countdown(n: u64) -> RStream<(), u64> {
    if n == 0 {
        return empty();
    }
    emit(n).concat(suspend(move || countdown(n - 1)))
}

#[tokio::test]
async fn test_recursive_suspend_is_stack_safe() {
    assert_eq!(countdown(100_000).run_count().await.unwrap(), 100_000);
}

fn nested(n: u64) -> RStream<(), u64> {
    emit(n).flat_map(|x| if x == 0 { emit(0) } else { nested(x - 1) })
}

#[tokio::test]
async fn test_deeply_nested_flat_map_is_stack_safe() {
    assert_eq!(nested(100_000).run_collect().await.unwrap(), vec![0]);
}

fn guarded(n: u64, released: Arc<Mutex<Vec<u64>>>) -> RStream<(), u64> {
    let log = Arc::clone(&released);
    emit(n)
        .ensuring(move || {
            let log = Arc::clone(&log);
            async move { log.lock().unwrap().push(n) }
        })
        .flat_map(move |x| {
            if x == 0 {
                iterate(0, |i| i + 1)
            } else {
                guarded(x - 1, Arc::clone(&released))
            }
        })
}

#[tokio::test]
async fn test_deep_flat_map_releases_in_reverse_when_cut_short() {
    let released = Arc::new(Mutex::new(Vec::new()));
    let depth = 100_000;
    let first = guarded(depth, Arc::clone(&released))
        .take(3)
        .run_collect()
        .await
        .unwrap();
    assert_eq!(first, vec![0, 1, 2]);
    assert_eq!(*released.lock().unwrap(), (0..=depth).collect::<Vec<_>>());
}

fn fib(n: u64) -> RStream<(), u64> {
    if n < 2 {
        return emit(n);
    }
    emit(n).flat_map(|n| fib(n - 1).concat(fib(n - 2)))
}

#[tokio::test]
async fn test_branching_flat_map_recursion() {
    let total = fib(20).run_fold(0u64, |acc, x| acc + x).await.unwrap();
    assert_eq!(total, 6765);
}

#[tokio::test]
async fn test_long_flat_map() {
    let total = range::<()>(0, 100_000)
        .flat_map(|x| emit(x as i64))
        .run_fold(0i64, |acc, x| acc + x)
        .await
        .unwrap();
    assert_eq!(total, (0..100_000i64).sum::<i64>());
}

#[tokio::test]
async fn test_panic_in_map_becomes_defect() {
    let result = range::<()>(0, 3)
        .map(|x| if x == 2 { panic!("bad element") } else { x })
        .run_collect()
        .await;
    assert_eq!(result, Err(Cause::die("bad element")));
}

#[tokio::test]
async fn test_queue_interop() {
    let queue = Queue::unbounded();
    for i in 0..5 {
        queue.offer(i).await.unwrap();
    }
    queue.close();
    let result = from_queue::<(), _>(queue).run_collect().await.unwrap();
    assert_eq!(result, vec![0, 1, 2, 3, 4]);

    let scope = Scope::new();
    let takes = range::<()>(0, 3).to_queue(&scope, 4);
    let replayed = from_take_queue(takes).run_collect().await.unwrap();
    assert_eq!(replayed, vec![0, 1, 2]);
    scope.close(ExitCase::Completed).await;
}

#[tokio::test]
async fn test_from_stream_is_single_use() {
    let stream: RStream<(), i32> = from_stream(futures_util::stream::iter(vec![1, 2]));
    assert_eq!(stream.clone().run_collect().await.unwrap(), vec![1, 2]);
    assert!(stream.run_collect().await.unwrap_err().is_die());
}
