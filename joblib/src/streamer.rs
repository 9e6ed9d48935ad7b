use crate::job::Job;
use crate::sink::OutputSink;
use futures::stream::{self, Stream};
use std::io::{self, SeekFrom};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::warn;

/// Where a new streamer begins reading a job's output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamStart {
    /// Only output appended after attaching.
    End,
    /// Everything the job has written so far, then live output.
    Beginning,
}

/// Live tail over one job's output, independent of any other streamer.
///
/// The first chunk is a `$ <command>` header; after that each chunk is whatever was
/// appended since the previous read. The stream never ends on its own, the consumer
/// drops it when its client goes away.
pub struct LogStreamer {
    sink: Arc<OutputSink>,
    header: Option<String>,
    file: Option<File>,
    offset: u64,
    pending: Vec<u8>,
    interval: Duration,
}

impl LogStreamer {
    pub fn new(job: &Job, start: StreamStart, interval: Duration) -> Self {
        let offset = match start {
            StreamStart::Beginning => 0,
            StreamStart::End => job.sink().size().unwrap_or_else(|err| {
                warn!(job_id = %job.id(), error = %err, "could not size job output, replaying");
                0
            }),
        };
        Self {
            sink: Arc::clone(job.sink()),
            header: Some(format!("$ {}\n", job.command_line())),
            file: None,
            offset,
            pending: Vec::new(),
            interval,
        }
    }

    /// Next chunk of text, waiting for new output if there is none yet.
    pub async fn next_chunk(&mut self) -> String {
        if let Some(header) = self.header.take() {
            return header;
        }
        loop {
            match self.read_available().await {
                Ok(text) if !text.is_empty() => return text,
                Ok(_) => {}
                Err(err) => {
                    warn!(path = ?self.sink.path(), error = %err, "failed to read job output");
                    self.file = None;
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = String> + Send + 'static {
        stream::unfold(self, |mut streamer| async move {
            let chunk = streamer.next_chunk().await;
            Some((chunk, streamer))
        })
    }

    async fn read_available(&mut self) -> io::Result<String> {
        if self.file.is_none() {
            let mut file = File::open(self.sink.path()).await?;
            file.seek(SeekFrom::Start(self.offset)).await?;
            self.file = Some(file);
        }
        if let Some(file) = self.file.as_mut() {
            let read = file.read_to_end(&mut self.pending).await?;
            self.offset += read as u64;
        }
        Ok(take_text(&mut self.pending))
    }
}

/// Decode the longest valid prefix of `buf`, leaving an incomplete trailing character
/// for the next read. Invalid sequences become U+FFFD.
fn take_text(buf: &mut Vec<u8>) -> String {
    let mut text = String::new();
    loop {
        match std::str::from_utf8(buf) {
            Ok(valid) => {
                text.push_str(valid);
                buf.clear();
                return text;
            }
            Err(err) => {
                let valid = err.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&buf[..valid]));
                match err.error_len() {
                    None => {
                        buf.drain(..valid);
                        return text;
                    }
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        buf.drain(..valid + len);
                    }
                }
            }
        }
    }
}
