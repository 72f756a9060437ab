use futures_util::stream;
use rs2_pull::rs2::*;
use std::collections::BTreeSet;
use tokio::runtime::Runtime;

#[test]
fn test_into_rs2() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let result = stream::iter(vec![1, 2, 3])
            .into_rs2::<()>()
            .map(|x| x * 10)
            .run_collect()
            .await
            .unwrap();
        assert_eq!(result, vec![10, 20, 30]);
    });
}

#[tokio::test]
async fn test_chunked_rs2() {
    let scope = Scope::new();
    let mut pull = stream::iter(0..5).chunked_rs2::<()>(2).open(&scope);
    assert_eq!(pull.pull().await, Take::Chunk(Chunk::from(vec![0, 1])));
    assert_eq!(pull.pull().await, Take::Chunk(Chunk::from(vec![2, 3])));
    assert_eq!(pull.pull().await, Take::Chunk(Chunk::from(vec![4])));
    assert_eq!(pull.pull().await, Take::End);
    scope.close(ExitCase::Completed).await;
}

#[tokio::test]
async fn test_par_flat_map_rs2() {
    let result = stream::iter(vec![1, 2, 3])
        .par_flat_map_rs2::<(), _, _>(2, |x| from_iter(vec![x, x * 100]))
        .run_collect()
        .await
        .unwrap();
    let values: BTreeSet<i32> = result.into_iter().collect();
    assert_eq!(values, BTreeSet::from([1, 2, 3, 100, 200, 300]));
}

#[tokio::test]
async fn test_into_rs2_try() {
    let items = vec![Ok(1), Ok(2), Err("bad row"), Ok(4)];
    let result = stream::iter(items).into_rs2_try().run_collect().await;
    assert_eq!(result, Err(Cause::Fail("bad row")));

    let clean = stream::iter(vec![Ok::<_, &str>(1), Ok(2)]).into_rs2_try().run_collect().await;
    assert_eq!(clean.unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn test_lifted_stream_round_trips() {
    use futures_util::StreamExt;
    let values = stream::iter(vec!["a", "b"])
        .into_rs2::<()>()
        .into_stream()
        .collect::<Vec<_>>()
        .await;
    assert_eq!(values, vec![Ok("a"), Ok("b")]);
}
