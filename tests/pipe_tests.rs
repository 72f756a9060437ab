use rs2_pull::pipe;
use rs2_pull::pipe::*;
use rs2_pull::rs2::*;
use tokio::runtime::Runtime;

#[test]
fn test_pipe_map() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let stream = from_iter::<(), _>(vec![1, 2, 3, 4, 5]);
        let pipe = map(|x: i32| x * 2);

        let result = pipe.apply(stream).run_collect().await.unwrap();
        assert_eq!(result, vec![2, 4, 6, 8, 10]);
    });
}

#[test]
fn test_pipe_filter() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let stream = from_iter::<(), _>(vec![1, 2, 3, 4, 5]);
        let pipe = pipe::filter(|x: &i32| x % 2 == 0);

        let result = pipe.apply(stream).run_collect().await.unwrap();
        assert_eq!(result, vec![2, 4]);
    });
}

#[tokio::test]
async fn test_pipe_compose_and_through() {
    let double = map::<(), _, _, _>(|x: i32| x * 2);
    let small = pipe::filter::<(), _, _>(|x: &i32| *x < 7);
    let to_text = map::<(), _, _, _>(|x: i32| format!("#{}", x));
    let combined = compose(compose(double, small), to_text);

    let result = range::<()>(0, 10).through(combined).run_collect().await.unwrap();
    assert_eq!(result, vec!["#0", "#2", "#4", "#6"]);
}

#[tokio::test]
async fn test_pipe_ext_compose_and_identity() {
    let pipeline = identity::<&str, i32>()
        .compose(Pipe::new(|s: RStream<&str, i32>| s.take(2)))
        .compose(map(|x: i32| x + 100));
    let result = from_iter::<&str, _>(vec![1, 2, 3]).through(pipeline.clone()).run_collect().await;
    assert_eq!(result.unwrap(), vec![101, 102]);

    // a pipe is reusable
    let again = pipeline.apply(emit(5)).run_collect().await.unwrap();
    assert_eq!(again, vec![105]);
}

#[tokio::test]
async fn test_pipe_carries_failures() {
    let pipe = map::<&str, _, _, _>(|x: i32| x + 1);
    let result = from_iter::<&str, _>(vec![1]).concat(fail("broken")).through(pipe).run_collect().await;
    assert_eq!(result, Err(Cause::Fail("broken")));
}
