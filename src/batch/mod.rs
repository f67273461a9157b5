//! Chunked apply with per-item failure isolation.
//!
//! [`BatchExecutor::run`] hands contiguous chunks of the input to a caller
//! operation. A chunk that fails as a whole is retried one item at a time, so
//! one bad target costs only itself. Every input item ends up in exactly one
//! of [`BatchResult::successes`] or [`BatchResult::failures`].

use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;

use crate::error::MailbridgeError;

pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Why a single item ended up in [`BatchResult::failures`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason<E> {
    /// The operation returned an error for the single-item call.
    Operation(E),
    /// The operation succeeded but returned the wrong number of results.
    ResultCountMismatch { expected: usize, returned: usize },
}

impl<E: fmt::Display> fmt::Display for FailureReason<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Operation(err) => write!(f, "{err}"),
            FailureReason::ResultCountMismatch { expected, returned } => write!(
                f,
                "operation returned {returned} results for {expected} items"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure<I, E> {
    pub item: I,
    pub reason: FailureReason<E>,
}

/// Outcome of a batch run.
///
/// Successes are appended in processing order: chunk results first, then the
/// results of any per-item retries for that chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult<I, O, E> {
    pub successes: Vec<O>,
    pub failures: Vec<ItemFailure<I, E>>,
}

impl<I, O, E> Default for BatchResult<I, O, E> {
    fn default() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<I, O, E> BatchResult<I, O, E> {
    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn success_count(&self) -> usize {
        self.successes.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// `"N of M succeeded"`.
    pub fn summary(&self) -> String {
        format!("{} of {} succeeded", self.success_count(), self.total())
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &I> {
        self.failures.iter().map(|failure| &failure.item)
    }
}

/// Items plus the chunk size to apply an operation with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob<I> {
    pub items: Vec<I>,
    pub chunk_size: usize,
}

impl<I> BatchJob<I> {
    pub fn new(items: Vec<I>) -> Self {
        Self {
            items,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// Sequential chunked executor.
///
/// # Example
/// ```
/// use mailbridge::batch::BatchExecutor;
///
/// # async fn example() -> Result<(), mailbridge::MailbridgeError> {
/// let executor = BatchExecutor::new(2)?;
/// let result = executor
///     .run(vec![1, 2, 3], |chunk: Vec<i32>| async move {
///         Ok::<_, String>(chunk.into_iter().map(|n| n * 10).collect::<Vec<_>>())
///     })
///     .await;
/// assert_eq!(result.successes, vec![10, 20, 30]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchExecutor {
    chunk_size: NonZeroUsize,
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self {
            chunk_size: NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl BatchExecutor {
    pub fn new(chunk_size: usize) -> Result<Self, MailbridgeError> {
        let chunk_size = NonZeroUsize::new(chunk_size).ok_or_else(|| {
            MailbridgeError::InvalidArgument("chunk size must be a positive integer".to_string())
        })?;
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.get()
    }

    /// Run `job` with its own chunk size.
    pub async fn run_job<I, O, E, F, Fut>(
        job: BatchJob<I>,
        operation: F,
    ) -> Result<BatchResult<I, O, E>, MailbridgeError>
    where
        I: Clone,
        E: fmt::Display,
        F: FnMut(Vec<I>) -> Fut,
        Fut: Future<Output = Result<Vec<O>, E>>,
    {
        let executor = Self::new(job.chunk_size)?;
        Ok(executor.run(job.items, operation).await)
    }

    /// Apply `operation` to `items` chunk by chunk.
    ///
    /// `operation` must return one output per input item on success. A chunk
    /// error, or a result count that does not match the chunk length, sends
    /// every item of that chunk through a single-item call. Chunks already
    /// applied are never revisited.
    pub async fn run<I, O, E, F, Fut>(&self, items: Vec<I>, mut operation: F) -> BatchResult<I, O, E>
    where
        I: Clone,
        E: fmt::Display,
        F: FnMut(Vec<I>) -> Fut,
        Fut: Future<Output = Result<Vec<O>, E>>,
    {
        let total = items.len();
        let chunk_size = self.chunk_size.get();
        let mut result = BatchResult::default();

        let mut remaining = items.into_iter().peekable();
        let mut chunk_index = 0usize;
        while remaining.peek().is_some() {
            let chunk: Vec<I> = remaining.by_ref().take(chunk_size).collect();
            let len = chunk.len();

            match operation(chunk.clone()).await {
                Ok(outputs) if outputs.len() == len => {
                    result.successes.extend(outputs);
                }
                Ok(outputs) => {
                    tracing::warn!(
                        chunk = chunk_index,
                        expected = len,
                        returned = outputs.len(),
                        "chunk returned wrong result count; retrying items individually"
                    );
                    Self::retry_items(chunk, &mut operation, &mut result).await;
                }
                Err(err) => {
                    tracing::warn!(
                        chunk = chunk_index,
                        size = len,
                        error = %err,
                        "chunk failed; retrying items individually"
                    );
                    Self::retry_items(chunk, &mut operation, &mut result).await;
                }
            }
            chunk_index += 1;
        }

        tracing::debug!(
            total,
            chunks = chunk_index,
            succeeded = result.success_count(),
            failed = result.failure_count(),
            "batch finished"
        );
        result
    }

    async fn retry_items<I, O, E, F, Fut>(
        chunk: Vec<I>,
        operation: &mut F,
        result: &mut BatchResult<I, O, E>,
    ) where
        I: Clone,
        E: fmt::Display,
        F: FnMut(Vec<I>) -> Fut,
        Fut: Future<Output = Result<Vec<O>, E>>,
    {
        for item in chunk {
            match operation(vec![item.clone()]).await {
                Ok(mut outputs) if outputs.len() == 1 => {
                    result.successes.append(&mut outputs);
                }
                Ok(outputs) => {
                    result.failures.push(ItemFailure {
                        item,
                        reason: FailureReason::ResultCountMismatch {
                            expected: 1,
                            returned: outputs.len(),
                        },
                    });
                }
                Err(err) => {
                    tracing::debug!(error = %err, "item failed");
                    result.failures.push(ItemFailure {
                        item,
                        reason: FailureReason::Operation(err),
                    });
                }
            }
        }
    }
}
