//! Element-wise and windowing combinators for RStream
//!
//! All combinators here are sequential: they transform the chunk stream of a
//! single upstream (or two, for the zips) inside the scope the result is
//! opened in.

use async_stream::stream;
use futures_util::stream::StreamExt;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use crate::chunk::Chunk;
use crate::error::Cause;
use crate::pipe::Pipe;
use crate::promise::Promise;
use crate::pull::{ChunkStream, Take};
use crate::rs2::{empty, RStream};

impl<E, A> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    /// Rewrite the opened chunk stream of `self`
    pub(crate) fn via<B, F>(self, f: F) -> RStream<E, B>
    where
        B: Send + 'static,
        F: Fn(ChunkStream<E, A>) -> ChunkStream<E, B> + Send + Sync + 'static,
    {
        RStream::from_process(move |scope| f(self.open_stream(scope)))
    }

    // ================================
    // Mapping
    // ================================

    pub fn map<B, F>(self, f: F) -> RStream<E, B>
    where
        B: Send + 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.via(move |s| {
            let f = Arc::clone(&f);
            s.map(move |item| item.map(|chunk| chunk.map(|a| f(a)))).boxed()
        })
    }

    pub fn map_chunks<B, F>(self, f: F) -> RStream<E, B>
    where
        B: Send + 'static,
        F: Fn(Chunk<A>) -> Chunk<B> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.via(move |s| {
            let f = Arc::clone(&f);
            s.map(move |item| item.map(|chunk| f(chunk))).boxed()
        })
    }

    /// Map each element with an effect, one element at a time
    pub fn map_m<B, F, Fut>(self, f: F) -> RStream<E, B>
    where
        B: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<B, E>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.via(move |s| {
            let f = Arc::clone(&f);
            stream! {
                let mut s = s;
                'outer: while let Some(item) = s.next().await {
                    match item {
                        Ok(chunk) => {
                            let mut out = Vec::with_capacity(chunk.len());
                            for a in chunk {
                                match f(a).await {
                                    Ok(b) => out.push(b),
                                    Err(e) => {
                                        yield Ok(Chunk::from(out));
                                        yield Err(Cause::Fail(e));
                                        break 'outer;
                                    }
                                }
                            }
                            yield Ok(Chunk::from(out));
                        }
                        Err(cause) => {
                            yield Err(cause);
                            break;
                        }
                    }
                }
            }
            .boxed()
        })
    }

    /// Run an effect for each element, passing the element through
    pub fn tap<F, Fut>(self, f: F) -> RStream<E, A>
    where
        F: Fn(&A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.map_m(move |a| {
            let effect = f(&a);
            async move { effect.await.map(|_| a) }
        })
    }

    pub fn filter<F>(self, predicate: F) -> RStream<E, A>
    where
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.via(move |s| {
            let predicate = Arc::clone(&predicate);
            s.map(move |item| item.map(|chunk| chunk.filter(|a| predicate(a)))).boxed()
        })
    }

    pub fn filter_map<B, F>(self, f: F) -> RStream<E, B>
    where
        B: Send + 'static,
        F: Fn(A) -> Option<B> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.via(move |s| {
            let f = Arc::clone(&f);
            s.map(move |item| item.map(|chunk| chunk.filter_map(|a| f(a)))).boxed()
        })
    }

    /// Discard every element, keeping effects, resources and failures
    pub fn drain<B>(self) -> RStream<E, B>
    where
        B: Send + 'static,
    {
        self.filter_map(|_| None)
    }

    /// Emit `init` followed by every intermediate accumulator
    pub fn scan<S, F>(self, init: S, f: F) -> RStream<E, S>
    where
        S: Clone + Send + Sync + 'static,
        F: Fn(S, A) -> S + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.via(move |s| {
            let f = Arc::clone(&f);
            let init = init.clone();
            stream! {
                let mut s = s;
                let mut state = init;
                yield Ok(Chunk::single(state.clone()));
                while let Some(item) = s.next().await {
                    match item {
                        Ok(chunk) => {
                            let mut out = Vec::with_capacity(chunk.len());
                            for a in chunk {
                                state = f(state, a);
                                out.push(state.clone());
                            }
                            yield Ok(Chunk::from(out));
                        }
                        Err(cause) => {
                            yield Err(cause);
                            break;
                        }
                    }
                }
            }
            .boxed()
        })
    }

    /// Re-group elements into chunks of `size`; the last chunk may be shorter
    pub fn rechunk(self, size: usize) -> RStream<E, A> {
        let size = size.max(1);
        self.via(move |s| {
            stream! {
                let mut s = s;
                let mut pending: Vec<A> = Vec::with_capacity(size);
                let mut failure = None;
                while let Some(item) = s.next().await {
                    match item {
                        Ok(chunk) => {
                            for a in chunk {
                                pending.push(a);
                                if pending.len() == size {
                                    yield Ok(Chunk::from(std::mem::replace(&mut pending, Vec::with_capacity(size))));
                                }
                            }
                        }
                        Err(cause) => {
                            failure = Some(cause);
                            break;
                        }
                    }
                }
                if !pending.is_empty() {
                    yield Ok(Chunk::from(pending));
                }
                if let Some(cause) = failure {
                    yield Err(cause);
                }
            }
            .boxed()
        })
    }

    pub fn zip_with_index(self) -> RStream<E, (A, usize)> {
        self.via(|s| {
            let mut index = 0usize;
            s.map(move |item| {
                item.map(|chunk| {
                    chunk.map(|a| {
                        let i = index;
                        index += 1;
                        (a, i)
                    })
                })
            })
            .boxed()
        })
    }

    // ================================
    // Limiting
    // ================================

    /// The first `n` elements. With `n == 0` upstream is never opened.
    pub fn take(self, n: usize) -> RStream<E, A> {
        if n == 0 {
            return empty();
        }
        self.via(move |s| {
            stream! {
                let mut s = s;
                let mut remaining = n;
                while let Some(item) = s.next().await {
                    match item {
                        Ok(chunk) => {
                            let chunk = chunk.take(remaining);
                            remaining -= chunk.len();
                            yield Ok(chunk);
                            if remaining == 0 {
                                break;
                            }
                        }
                        Err(cause) => {
                            yield Err(cause);
                            break;
                        }
                    }
                }
            }
            .boxed()
        })
    }

    pub fn take_while<F>(self, predicate: F) -> RStream<E, A>
    where
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.take_with(predicate, false)
    }

    /// Take elements up to and including the first one matching `predicate`
    pub fn take_until<F>(self, predicate: F) -> RStream<E, A>
    where
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.take_with(move |a| !predicate(a), true)
    }

    fn take_with<F>(self, keep: F, inclusive: bool) -> RStream<E, A>
    where
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        let keep = Arc::new(keep);
        self.via(move |s| {
            let keep = Arc::clone(&keep);
            stream! {
                let mut s = s;
                'outer: while let Some(item) = s.next().await {
                    match item {
                        Ok(chunk) => {
                            let mut out = Vec::with_capacity(chunk.len());
                            for a in chunk {
                                if keep(&a) {
                                    out.push(a);
                                } else {
                                    if inclusive {
                                        out.push(a);
                                    }
                                    yield Ok(Chunk::from(out));
                                    break 'outer;
                                }
                            }
                            yield Ok(Chunk::from(out));
                        }
                        Err(cause) => {
                            yield Err(cause);
                            break;
                        }
                    }
                }
            }
            .boxed()
        })
    }

    pub fn drop(self, n: usize) -> RStream<E, A> {
        if n == 0 {
            return self;
        }
        self.via(move |s| {
            let mut remaining = n;
            s.map(move |item| {
                item.map(|chunk| {
                    if remaining == 0 {
                        return chunk;
                    }
                    let skip = remaining.min(chunk.len());
                    remaining -= skip;
                    chunk.split_at(skip).1
                })
            })
            .boxed()
        })
    }

    pub fn drop_while<F>(self, predicate: F) -> RStream<E, A>
    where
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.via(move |s| {
            let predicate = Arc::clone(&predicate);
            let mut dropping = true;
            s.map(move |item| {
                item.map(|chunk| {
                    if !dropping {
                        return chunk;
                    }
                    chunk.filter(|a| {
                        dropping = dropping && predicate(a);
                        !dropping
                    })
                })
            })
            .boxed()
        })
    }

    // ================================
    // Zipping
    // ================================

    /// Pair elements positionally; ends as soon as either side ends
    pub fn zip_with<B, C, F>(self, that: RStream<E, B>, f: F) -> RStream<E, C>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: Fn(A, B) -> C + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        RStream::from_process(move |scope| {
            let f = Arc::clone(&f);
            let mut left = self.open(scope);
            let mut right = that.open(scope);
            stream! {
                let mut lefts: VecDeque<A> = VecDeque::new();
                let mut rights: VecDeque<B> = VecDeque::new();
                loop {
                    if lefts.is_empty() {
                        match left.pull().await {
                            Take::Chunk(chunk) => lefts.extend(chunk),
                            Take::End => break,
                            Take::Fail(cause) => {
                                yield Err(cause);
                                break;
                            }
                        }
                    }
                    if rights.is_empty() {
                        match right.pull().await {
                            Take::Chunk(chunk) => rights.extend(chunk),
                            Take::End => break,
                            Take::Fail(cause) => {
                                yield Err(cause);
                                break;
                            }
                        }
                    }
                    let n = lefts.len().min(rights.len());
                    let out: Chunk<C> = lefts
                        .drain(..n)
                        .zip(rights.drain(..n))
                        .map(|(a, b)| f(a, b))
                        .collect();
                    yield Ok(out);
                }
            }
            .boxed()
        })
    }

    pub fn zip<B>(self, that: RStream<E, B>) -> RStream<E, (A, B)>
    where
        B: Send + 'static,
    {
        self.zip_with(that, |a, b| (a, b))
    }

    /// Pair elements positionally, continuing with the longer side alone
    pub fn zip_all_with<B, C, L, R, F>(
        self,
        that: RStream<E, B>,
        left_only: L,
        right_only: R,
        both: F,
    ) -> RStream<E, C>
    where
        B: Send + 'static,
        C: Send + 'static,
        L: Fn(A) -> C + Send + Sync + 'static,
        R: Fn(B) -> C + Send + Sync + 'static,
        F: Fn(A, B) -> C + Send + Sync + 'static,
    {
        let left_only = Arc::new(left_only);
        let right_only = Arc::new(right_only);
        let both = Arc::new(both);
        RStream::from_process(move |scope| {
            let left_only = Arc::clone(&left_only);
            let right_only = Arc::clone(&right_only);
            let both = Arc::clone(&both);
            let mut left = self.open(scope);
            let mut right = that.open(scope);
            stream! {
                let mut lefts: VecDeque<A> = VecDeque::new();
                let mut rights: VecDeque<B> = VecDeque::new();
                let mut left_done = false;
                let mut right_done = false;
                loop {
                    if lefts.is_empty() && !left_done {
                        match left.pull().await {
                            Take::Chunk(chunk) => lefts.extend(chunk),
                            Take::End => left_done = true,
                            Take::Fail(cause) => {
                                yield Err(cause);
                                break;
                            }
                        }
                    }
                    if rights.is_empty() && !right_done {
                        match right.pull().await {
                            Take::Chunk(chunk) => rights.extend(chunk),
                            Take::End => right_done = true,
                            Take::Fail(cause) => {
                                yield Err(cause);
                                break;
                            }
                        }
                    }
                    let out: Chunk<C> = match (left_done && lefts.is_empty(), right_done && rights.is_empty()) {
                        (true, true) => break,
                        (true, false) => rights.drain(..).map(|b| right_only(b)).collect(),
                        (false, true) => lefts.drain(..).map(|a| left_only(a)).collect(),
                        (false, false) => {
                            let n = lefts.len().min(rights.len());
                            lefts
                                .drain(..n)
                                .zip(rights.drain(..n))
                                .map(|(a, b)| both(a, b))
                                .collect()
                        }
                    };
                    yield Ok(out);
                }
            }
            .boxed()
        })
    }

    /// `zip_all_with` padding the shorter side with defaults
    pub fn zip_all<B>(self, that: RStream<E, B>, default_left: A, default_right: B) -> RStream<E, (A, B)>
    where
        A: Clone + Sync,
        B: Clone + Send + Sync + 'static,
    {
        self.zip_all_with(
            that,
            move |a| (a, default_right.clone()),
            move |b| (default_left.clone(), b),
            |a, b| (a, b),
        )
    }

    // ================================
    // Misc
    // ================================

    /// End the stream as soon as `signal` completes, abandoning any pull in
    /// progress
    pub fn interrupt_when(self, signal: Promise<()>) -> RStream<E, A> {
        self.via(move |s| {
            let signal = signal.clone();
            stream! {
                let mut s = s;
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = signal.wait() => None,
                        item = s.next() => Some(item),
                    };
                    match next {
                        None | Some(None) => break,
                        Some(Some(Ok(chunk))) => yield Ok(chunk),
                        Some(Some(Err(cause))) => {
                            yield Err(cause);
                            break;
                        }
                    }
                }
            }
            .boxed()
        })
    }

    pub fn through<B>(self, pipe: Pipe<E, A, B>) -> RStream<E, B>
    where
        B: Send + 'static,
    {
        pipe.apply(self)
    }
}
