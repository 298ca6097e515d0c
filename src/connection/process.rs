//! Process-like handle over a command running on a remote host.
//!
//! A [`RemoteProcess`] is backed by one worker task that drives the transport
//! and is the only writer into the stdout/stderr pipes. The caller reads from
//! the other end of those pipes concurrently. Each pipe is a bounded in-memory
//! duplex buffer: the worker suspends when the buffer is full, the reader
//! suspends when it is empty, and the reader sees end-of-stream once the worker
//! finishes (or is destroyed).
//!
//! Like [`tokio::process::Child`], the output streams are `Option`s that can be
//! taken by the caller. Output that is not read can fill the pipe and stall the
//! worker, so callers that only need the exit code should drop the streams they
//! do not read: writes into a dropped pipe are discarded.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadBuf, Sink};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{CommandResult, ConnectionError, ConnectionResult};

/// Default buffer size of each output pipe
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Create a connected sink/reader pair with the given buffer capacity.
pub fn output_pipe(capacity: usize) -> (OutputSink, ProcessOutput) {
    let (writer, reader) = tokio::io::duplex(capacity.max(1));
    (OutputSink::new(writer), ProcessOutput { inner: reader })
}

/// Write side of an output pipe, owned by the worker.
///
/// Appends only. If the reading side has gone away, further output is
/// discarded instead of failing the command.
#[derive(Debug)]
pub struct OutputSink {
    pipe: Option<DuplexStream>,
    written: u64,
}

impl OutputSink {
    fn new(pipe: DuplexStream) -> Self {
        Self {
            pipe: Some(pipe),
            written: 0,
        }
    }

    /// A sink that discards everything
    pub fn discard() -> Self {
        Self {
            pipe: None,
            written: 0,
        }
    }

    /// Append bytes to the pipe, waiting for buffer space if needed
    pub async fn append(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.written += bytes.len() as u64;

        if let Some(pipe) = self.pipe.as_mut() {
            if let Err(e) = pipe.write_all(bytes).await {
                debug!(error = %e, "Output reader went away, discarding further output");
                self.pipe = None;
            }
        }
    }

    /// Total number of bytes appended, including discarded ones
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Close the pipe so the reader sees end-of-stream
    pub async fn close(&mut self) {
        if let Some(mut pipe) = self.pipe.take() {
            let _ = pipe.shutdown().await;
        }
    }
}

/// Read side of an output pipe.
#[derive(Debug)]
pub struct ProcessOutput {
    inner: DuplexStream,
}

impl ProcessOutput {
    /// Read until the worker closes the pipe
    pub async fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.inner.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

impl AsyncRead for ProcessOutput {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Handle to a command running on a remote host.
#[derive(Debug)]
pub struct RemoteProcess {
    /// Standard input. Commands are dispatched write-once, so this discards.
    pub stdin: Option<Sink>,
    /// Standard output of the remote command
    pub stdout: Option<ProcessOutput>,
    /// Standard error of the remote command
    pub stderr: Option<ProcessOutput>,
    worker: Option<JoinHandle<ConnectionResult<i32>>>,
    exit_code: Option<i32>,
}

impl RemoteProcess {
    /// Spawn `worker` on the runtime and wire its sinks to this handle.
    ///
    /// The worker receives the stdout and stderr sinks and resolves to the
    /// command's exit code. Both sinks are closed when the worker returns.
    pub fn spawn<F, Fut>(capacity: usize, worker: F) -> Self
    where
        F: FnOnce(OutputSink, OutputSink) -> Fut,
        Fut: Future<Output = (ConnectionResult<i32>, OutputSink, OutputSink)> + Send + 'static,
    {
        let (stdout_sink, stdout) = output_pipe(capacity);
        let (stderr_sink, stderr) = output_pipe(capacity);
        let task = worker(stdout_sink, stderr_sink);

        let handle = tokio::spawn(async move {
            let (result, mut stdout, mut stderr) = task.await;
            stdout.close().await;
            stderr.close().await;
            trace!(
                stdout_bytes = stdout.bytes_written(),
                stderr_bytes = stderr.bytes_written(),
                "Remote process worker finished"
            );
            result
        });

        Self {
            stdin: Some(tokio::io::sink()),
            stdout: Some(stdout),
            stderr: Some(stderr),
            worker: Some(handle),
            exit_code: None,
        }
    }

    /// Wait for the command to finish and return its exit code.
    ///
    /// Calling this again after completion returns the same exit code.
    pub async fn wait(&mut self) -> ConnectionResult<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }

        // Keep the handle until it resolves so a cancelled wait can still destroy.
        let handle = self.worker.as_mut().ok_or(ConnectionError::ProcessDestroyed)?;
        let joined = handle.await;
        self.worker = None;
        let code = match joined {
            Ok(result) => result?,
            Err(e) if e.is_cancelled() => return Err(ConnectionError::ProcessDestroyed),
            Err(e) => {
                return Err(ConnectionError::IoError(io::Error::new(
                    io::ErrorKind::Other,
                    format!("remote process worker panicked: {}", e),
                )))
            }
        };

        self.exit_code = Some(code);
        Ok(code)
    }

    /// Read both streams to the end and wait for the exit code
    pub async fn wait_with_output(mut self) -> ConnectionResult<CommandResult> {
        let mut stdout = self.stdout.take();
        let mut stderr = self.stderr.take();

        let read_stdout = async {
            match stdout.as_mut() {
                Some(out) => out.read_all().await,
                None => Ok(Vec::new()),
            }
        };
        let read_stderr = async {
            match stderr.as_mut() {
                Some(err) => err.read_all().await,
                None => Ok(Vec::new()),
            }
        };

        let (out, err, code) = tokio::join!(read_stdout, read_stderr, self.wait());
        let code = code?;

        Ok(CommandResult::from_exit_code(
            code,
            String::from_utf8_lossy(&out?).into_owned(),
            String::from_utf8_lossy(&err?).into_owned(),
        ))
    }

    /// Exit code if the process has already been waited for
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Whether the worker is still running
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop the worker without waiting for orderly completion.
    ///
    /// Pending transport calls are dropped and the pipes are closed, so
    /// blocked readers see end-of-stream. A later [`wait`](Self::wait) reports
    /// [`ConnectionError::ProcessDestroyed`] unless the command had already
    /// completed.
    pub fn destroy(&mut self) {
        if let Some(handle) = self.worker.as_ref() {
            debug!("Destroying remote process");
            handle.abort();
        }
        self.stdin = None;
    }
}

impl Drop for RemoteProcess {
    fn drop(&mut self) {
        // An unawaited worker would keep polling the server forever.
        if let Some(handle) = self.worker.take() {
            if !handle.is_finished() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_output_pipe_delivers_in_order() {
        let (mut sink, mut output) = output_pipe(16);
        let writer = tokio::spawn(async move {
            sink.append(b"first ").await;
            sink.append(b"second ").await;
            sink.append(b"third").await;
            sink.close().await;
        });

        let data = output.read_all().await.unwrap();
        writer.await.unwrap();
        assert_eq!(data, b"first second third");
    }

    #[tokio::test]
    async fn test_sink_discards_after_reader_dropped() {
        let (mut sink, output) = output_pipe(4);
        drop(output);
        sink.append(b"nobody is listening").await;
        sink.append(b"still fine").await;
        assert_eq!(sink.bytes_written(), 29);
    }

    #[tokio::test]
    async fn test_spawn_and_wait() {
        let mut process = RemoteProcess::spawn(DEFAULT_PIPE_CAPACITY, |mut out, mut err| async move {
            out.append(b"hello").await;
            err.append(b"warning").await;
            (Ok(3), out, err)
        });

        let mut stdout = process.stdout.take().unwrap();
        let mut stderr = process.stderr.take().unwrap();
        assert_eq!(stdout.read_all().await.unwrap(), b"hello");
        assert_eq!(stderr.read_all().await.unwrap(), b"warning");
        assert_eq!(process.wait().await.unwrap(), 3);
        assert_eq!(process.wait().await.unwrap(), 3);
        assert_eq!(process.exit_code(), Some(3));
    }

    #[tokio::test]
    async fn test_wait_with_output() {
        let process = RemoteProcess::spawn(8, |mut out, err| async move {
            // more than the pipe capacity, so reading must happen concurrently
            out.append(b"0123456789abcdef0123456789").await;
            (Ok(0), out, err)
        });

        let result = process.wait_with_output().await.unwrap();
        assert!(result.success);
        assert_eq!(result.stdout, "0123456789abcdef0123456789");
        assert_eq!(result.stderr, "");
    }

    #[tokio::test]
    async fn test_worker_error_is_reported_by_wait() {
        let mut process = RemoteProcess::spawn(8, |out, err| async move {
            (Err(ConnectionError::CommandNotFinished), out, err)
        });
        assert!(matches!(
            process.wait().await,
            Err(ConnectionError::CommandNotFinished)
        ));
    }

    #[tokio::test]
    async fn test_destroy_unblocks_reader() {
        let mut process = RemoteProcess::spawn(8, |mut out, err| async move {
            out.append(b"partial").await;
            std::future::pending::<()>().await;
            (Ok(0), out, err)
        });

        let mut stdout = process.stdout.take().unwrap();
        let mut buf = [0u8; 7];
        stdout.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"partial");

        process.destroy();
        let rest = tokio::time::timeout(Duration::from_secs(5), stdout.read_all())
            .await
            .expect("reader should be unblocked")
            .unwrap();
        assert!(rest.is_empty());
        assert!(matches!(
            process.wait().await,
            Err(ConnectionError::ProcessDestroyed)
        ));
    }
}
