//! Groups decoded records into fixed-size, job-tagged batches.

use crate::decode::{DecodeError, Record};

/// A group of records written to the store as one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub job_id: String,
    /// Upload the records came from; persisted alongside each row.
    pub filename: String,
    /// Position of this batch within its job, starting at 0.
    pub seq: usize,
    pub records: Vec<Record>,
    /// Failed write attempts so far. Bumped by the worker before a requeue.
    pub attempts: u32,
}

impl Batch {
    pub fn new(job_id: &str, filename: &str, seq: usize, records: Vec<Record>) -> Self {
        Self {
            job_id: job_id.to_string(),
            filename: filename.to_string(),
            seq,
            records,
            attempts: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Number of batches `record_count` rows produce at `chunk_size` rows each.
pub fn total_batches(record_count: usize, chunk_size: usize) -> usize {
    record_count.div_ceil(chunk_size)
}

/// Iterator adapter that chunks a record stream into [`Batch`]es.
///
/// A decode error from the underlying stream is yielded once, after which
/// the batcher is exhausted.
pub struct Batcher<I> {
    records: I,
    job_id: String,
    filename: String,
    chunk_size: usize,
    next_seq: usize,
    done: bool,
}

impl<I> Batcher<I>
where
    I: Iterator<Item = Result<Record, DecodeError>>,
{
    /// # Panics
    /// Panics if `chunk_size` is 0.
    pub fn new(records: I, job_id: &str, filename: &str, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be > 0");
        Self {
            records,
            job_id: job_id.to_string(),
            filename: filename.to_string(),
            chunk_size,
            next_seq: 0,
            done: false,
        }
    }
}

impl<I> Iterator for Batcher<I>
where
    I: Iterator<Item = Result<Record, DecodeError>>,
{
    type Item = Result<Batch, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut records = Vec::with_capacity(self.chunk_size);
        while records.len() < self.chunk_size {
            match self.records.next() {
                Some(Ok(record)) => records.push(record),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        if records.is_empty() {
            return None;
        }

        let batch = Batch::new(&self.job_id, &self.filename, self.next_seq, records);
        self.next_seq += 1;
        Some(Ok(batch))
    }
}
