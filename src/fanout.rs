//! Fan-out combinators: distribution, broadcast, grouping and partitioning
//!
//! A single upstream runs in a fiber of a caller-provided scope and feeds one
//! bounded queue per subscriber. Elements are queued one per entry, so a
//! subscriber may fall at most `maximum_lag` elements behind before upstream
//! waits for it. Subscribers whose consumers go away shut their queues down
//! and are dropped from the distribution.

use futures::future::Either;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{catch_defect, Cause};
use crate::fiber::Fiber;
use crate::pull::Take;
use crate::queue::Queue;
use crate::rs2::{empty, from_take_queue, RStream};
use crate::scope::Scope;
use crate::stream_configuration::StreamConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Decide<A> = Arc<dyn Fn(&A, SubscriptionId) -> bool + Send + Sync>;

struct Hub<E, A> {
    next_id: u64,
    queues: Vec<(SubscriptionId, Queue<Take<E, A>>)>,
    finished: Option<Option<Cause<E>>>,
}

fn terminal<E: Clone, A>(cause: &Option<Cause<E>>) -> Take<E, A> {
    match cause {
        Some(cause) => Take::Fail(cause.clone()),
        None => Take::End,
    }
}

/// Handle for subscribing to a running distribution
pub struct Distributor<E, A> {
    hub: Arc<Mutex<Hub<E, A>>>,
    maximum_lag: usize,
}

impl<E, A> Clone for Distributor<E, A> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
            maximum_lag: self.maximum_lag,
        }
    }
}

/// One subscriber's view of a distribution
pub struct Subscription<E, A> {
    id: SubscriptionId,
    queue: Queue<Take<E, A>>,
}

impl<E, A> Subscription<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The subscribed elements as a stream. Closing its scope early cancels
    /// the subscription.
    pub fn into_stream(self) -> RStream<E, A> {
        from_take_queue(self.queue)
    }
}

impl<E, A> Distributor<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + 'static,
{
    fn new(maximum_lag: usize) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                next_id: 0,
                queues: Vec::new(),
                finished: None,
            })),
            maximum_lag: maximum_lag.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Hub<E, A>> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a subscriber. After upstream has finished, the subscription sees
    /// the final end or failure right away.
    pub fn subscribe(&self) -> Subscription<E, A> {
        let queue = Queue::bounded(self.maximum_lag);
        let mut hub = self.lock();
        let id = SubscriptionId(hub.next_id);
        hub.next_id += 1;
        match &hub.finished {
            Some(cause) => {
                let _ = queue.try_offer(terminal(cause));
            }
            None => hub.queues.push((id, queue.clone())),
        }
        log::debug!("distributor: {} subscribed", id);
        Subscription { id, queue }
    }

    /// Stop delivering to `id`
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let removed = {
            let mut hub = self.lock();
            let position = hub.queues.iter().position(|(sub, _)| *sub == id);
            position.map(|i| hub.queues.remove(i).1)
        };
        if let Some(queue) = removed {
            queue.shutdown();
            log::debug!("distributor: {} unsubscribed", id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().queues.len()
    }

    fn drop_subscriber(&self, id: SubscriptionId) {
        self.lock().queues.retain(|(sub, _)| *sub != id);
        log::debug!("distributor: {} went away", id);
    }

    fn start(&self, upstream: RStream<E, A>, scope: &Scope, decide: Decide<A>) {
        let distributor = self.clone();
        Fiber::fork(scope, move |own| async move {
            let mut pull = upstream.open(&own);
            let outcome = 'outer: loop {
                match pull.pull().await {
                    Take::Chunk(chunk) => {
                        for a in chunk {
                            let targets: Vec<_> = distributor.lock().queues.clone();
                            let chosen = catch_defect(|| {
                                targets
                                    .into_iter()
                                    .filter(|(id, _)| decide(&a, *id))
                                    .collect::<Vec<_>>()
                            });
                            let chosen = match chosen {
                                Ok(chosen) => chosen,
                                Err(defect) => break 'outer Some(Cause::Die(defect)),
                            };
                            for (id, queue) in chosen {
                                if queue.offer(Take::single(a.clone())).await.is_err() {
                                    distributor.drop_subscriber(id);
                                }
                            }
                        }
                    }
                    Take::End => break None,
                    Take::Fail(cause) => break Some(cause),
                }
            };
            let queues = {
                let mut hub = distributor.lock();
                hub.finished = Some(outcome.clone());
                std::mem::take(&mut hub.queues)
            };
            for (_, queue) in queues {
                let _ = queue.offer(terminal(&outcome)).await;
            }
        });
    }
}

/// A keyed split of a stream, configured before it is run
pub struct GroupBy<E, K, A> {
    upstream: RStream<E, A>,
    key_of: Arc<dyn Fn(&A) -> K + Send + Sync>,
    buffer: usize,
    first: Option<usize>,
    admit: Option<Arc<dyn Fn(&K) -> bool + Send + Sync>>,
}

impl<E, K, A> GroupBy<E, K, A>
where
    E: Clone + Send + Sync + 'static,
    K: Clone + Eq + Hash + Send + Sync + 'static,
    A: Send + 'static,
{
    /// Only the first `n` distinct keys get a group
    pub fn first(mut self, n: usize) -> Self {
        self.first = Some(n);
        self
    }

    /// Only keys matching `predicate` get a group
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&K) -> bool + Send + Sync + 'static,
    {
        self.admit = Some(Arc::new(predicate));
        self
    }

    /// One `(key, sub-stream)` pair per admitted key, in order of first appearance.
    ///
    /// Elements whose key was not admitted are discarded. An upstream
    /// failure ends every sub-stream with that failure.
    pub fn grouped(self) -> RStream<E, (K, RStream<E, A>)> {
        let GroupBy {
            upstream,
            key_of,
            buffer,
            first,
            admit,
        } = self;
        let buffer = buffer.max(1);
        RStream::from_process(move |scope| {
            let groups = Queue::bounded(buffer);
            let out = groups.clone();
            let upstream = upstream.clone();
            let key_of = Arc::clone(&key_of);
            let admit = admit.clone();
            Fiber::fork(scope, move |own| async move {
                let mut pull = upstream.open(&own);
                let mut keys: HashMap<K, Option<Queue<Take<E, A>>>> = HashMap::new();
                let mut admitted = 0usize;
                let outcome = 'outer: loop {
                    let chunk = match pull.pull().await {
                        Take::Chunk(chunk) => chunk,
                        Take::End => break None,
                        Take::Fail(cause) => break Some(cause),
                    };
                    for a in chunk {
                        let key = match catch_defect(|| key_of(&a)) {
                            Ok(key) => key,
                            Err(defect) => break 'outer Some(Cause::Die(defect)),
                        };
                        let target = match keys.get(&key) {
                            Some(slot) => slot.clone(),
                            None => {
                                let wanted = admit.as_ref().map_or(true, |p| p(&key))
                                    && first.map_or(true, |n| admitted < n);
                                let slot = if wanted {
                                    admitted += 1;
                                    let queue = Queue::bounded(buffer);
                                    let group = (key.clone(), from_take_queue(queue.clone()));
                                    if out.offer(Take::single(group)).await.is_err() {
                                        log::debug!("group consumer went away");
                                        break 'outer None;
                                    }
                                    Some(queue)
                                } else {
                                    None
                                };
                                keys.insert(key.clone(), slot.clone());
                                slot
                            }
                        };
                        if let Some(queue) = target {
                            if queue.offer(Take::single(a)).await.is_err() {
                                keys.insert(key, None);
                            }
                        }
                    }
                };
                for queue in keys.values().flatten() {
                    let _ = queue.offer(terminal(&outcome)).await;
                }
                let _ = out.offer(terminal(&outcome)).await;
            });
            from_take_queue(groups).open_stream(scope)
        })
    }

    /// Run `f` on every group concurrently and merge the results
    pub fn apply<B, F>(self, f: F) -> RStream<E, B>
    where
        B: Send + 'static,
        F: Fn(K, RStream<E, A>) -> RStream<E, B> + Send + Sync + 'static,
    {
        let buffer = StreamConfig::global().output_buffer;
        self.grouped()
            .flat_map_par_buffer(usize::MAX, buffer, move |(key, group)| f(key, group))
    }
}

impl<E, A> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    /// Split the stream by key; see [`GroupBy`]
    pub fn group_by_key<K, F>(self, key_of: F, buffer: usize) -> GroupBy<E, K, A>
    where
        K: Clone + Eq + Hash + Send + Sync + 'static,
        F: Fn(&A) -> K + Send + Sync + 'static,
    {
        GroupBy {
            upstream: self,
            key_of: Arc::new(key_of),
            buffer,
            first: None,
            admit: None,
        }
    }

    /// `group_by_key` with the configured per-key buffer
    pub fn group_by_key_default<K, F>(self, key_of: F) -> GroupBy<E, K, A>
    where
        K: Clone + Eq + Hash + Send + Sync + 'static,
        F: Fn(&A) -> K + Send + Sync + 'static,
    {
        let buffer = StreamConfig::global().group_buffer;
        self.group_by_key(key_of, buffer)
    }
}

impl<E, A> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + 'static,
{
    /// Run the stream in a fiber of `scope`, handing each element to the
    /// subscribers `decide` selects. Subscribers may join at any time.
    pub fn distributed_with_dynamic<F>(self, scope: &Scope, maximum_lag: usize, decide: F) -> Distributor<E, A>
    where
        F: Fn(&A, SubscriptionId) -> bool + Send + Sync + 'static,
    {
        let distributor = Distributor::new(maximum_lag);
        distributor.start(self, scope, Arc::new(decide));
        distributor
    }

    /// Split into `n` streams; element `a` goes to every branch `i` with `decide(&a, i)`
    pub fn distributed_with<F>(self, scope: &Scope, n: usize, maximum_lag: usize, decide: F) -> Vec<RStream<E, A>>
    where
        F: Fn(&A, usize) -> bool + Send + Sync + 'static,
    {
        let distributor = Distributor::new(maximum_lag);
        let branches: Vec<_> = (0..n).map(|_| distributor.subscribe()).collect();
        distributor.start(self, scope, Arc::new(move |a: &A, id: SubscriptionId| decide(a, id.0 as usize)));
        branches.into_iter().map(Subscription::into_stream).collect()
    }

    /// `n` streams that each see every element
    pub fn broadcast(self, scope: &Scope, n: usize, maximum_lag: usize) -> Vec<RStream<E, A>> {
        self.distributed_with(scope, n, maximum_lag, |_, _| true)
    }

    /// `broadcast` with the configured subscriber lag
    pub fn broadcast_default(self, scope: &Scope, n: usize) -> Vec<RStream<E, A>> {
        let lag = StreamConfig::global().broadcast_lag;
        self.broadcast(scope, n, lag)
    }

    pub fn broadcast_dynamic(self, scope: &Scope, maximum_lag: usize) -> Distributor<E, A> {
        self.distributed_with_dynamic(scope, maximum_lag, |_, _| true)
    }

    /// Split by an effectful classification into left and right streams
    pub fn partition_either<L, R, F, Fut>(
        self,
        scope: &Scope,
        f: F,
        buffer: usize,
    ) -> (RStream<E, L>, RStream<E, R>)
    where
        L: Clone + Send + 'static,
        R: Clone + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Either<L, R>, E>> + Send + 'static,
    {
        let mut branches = self
            .map_m(f)
            .distributed_with(scope, 2, buffer, |side, i| match side {
                Either::Left(_) => i == 0,
                Either::Right(_) => i == 1,
            })
            .into_iter();
        let mut next_branch = || branches.next().unwrap_or_else(empty);
        let left = next_branch().filter_map(|side| match side {
            Either::Left(l) => Some(l),
            Either::Right(_) => None,
        });
        let right = next_branch().filter_map(|side| match side {
            Either::Left(_) => None,
            Either::Right(r) => Some(r),
        });
        (left, right)
    }

    /// `(matching, not matching)`
    pub fn partition<F>(self, scope: &Scope, predicate: F, buffer: usize) -> (RStream<E, A>, RStream<E, A>)
    where
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.partition_either(
            scope,
            move |a| {
                let side = if predicate(&a) { Either::Left(a) } else { Either::Right(a) };
                async move { Ok(side) }
            },
            buffer,
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::rs2::*;

    #[tokio::test]
    async fn late_subscriber_sees_failure() {
        let scope = Scope::new();
        let distributor = fail::<&str, i32>("gone").broadcast_dynamic(&scope, 4);
        let early = distributor.subscribe();
        assert_eq!(early.into_stream().run_collect().await, Err(Cause::Fail("gone")));
        let late = distributor.subscribe();
        assert_eq!(late.into_stream().run_collect().await, Err(Cause::Fail("gone")));
        scope.close(ExitCase::Completed).await;
    }

    #[tokio::test]
    async fn partition_splits_by_predicate() {
        let scope = Scope::new();
        let (even, odd) = range::<()>(0, 6).partition(&scope, |x| x % 2 == 0, 8);
        let (even, odd) = futures::join!(even.run_collect(), odd.run_collect());
        assert_eq!(even.unwrap(), vec![0, 2, 4]);
        assert_eq!(odd.unwrap(), vec![1, 3, 5]);
        scope.close(ExitCase::Completed).await;
    }
}
