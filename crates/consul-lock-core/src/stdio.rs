use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::codec::{BytesCodec, FramedRead};

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Unpin + Sync + Send>>>;

#[derive(Clone, derive_more::From)]
pub enum RelayStdio {
    Out(RelayStdOut),
    Err(RelayStdErr),
}

impl RelayStdio {
    pub fn inner(&self) -> SharedWriter {
        match self {
            RelayStdio::Out(out) => out.inner(),
            RelayStdio::Err(err) => err.inner(),
        }
    }
}

/// Destination for the child's standard output
pub struct RelayStdOut(SharedWriter);

impl Clone for RelayStdOut {
    fn clone(&self) -> Self {
        RelayStdOut(self.0.clone())
    }
}

impl RelayStdOut {
    pub fn new(t: Box<dyn AsyncWrite + Unpin + Sync + Send>) -> RelayStdOut {
        RelayStdOut(Arc::new(Mutex::new(t)))
    }

    /// The invoking process's standard output
    pub fn inherit() -> RelayStdOut {
        RelayStdOut::new(Box::new(tokio::io::stdout()))
    }

    pub fn inner(&self) -> SharedWriter {
        self.0.clone()
    }
}

/// Destination for the child's standard error
pub struct RelayStdErr(SharedWriter);

impl Clone for RelayStdErr {
    fn clone(&self) -> Self {
        RelayStdErr(self.0.clone())
    }
}

impl RelayStdErr {
    pub fn new(t: Box<dyn AsyncWrite + Unpin + Sync + Send>) -> RelayStdErr {
        RelayStdErr(Arc::new(Mutex::new(t)))
    }

    /// The invoking process's standard error
    pub fn inherit() -> RelayStdErr {
        RelayStdErr::new(Box::new(tokio::io::stderr()))
    }

    pub fn inner(&self) -> SharedWriter {
        self.0.clone()
    }
}

/// Copy `io` into one of the shared sinks until EOF, flushing every frame.
/// Returns the number of bytes relayed.
pub async fn stream<A: AsyncRead + Unpin>(
    io: A,
    out: impl Into<RelayStdio>,
) -> tokio::io::Result<u64> {
    let out = out.into().inner();
    let mut frames = FramedRead::with_capacity(io, BytesCodec::new(), 8 * 1024);
    let mut total = 0u64;

    while let Some(frame) = frames.next().await {
        let bytes = frame?;
        let mut sink = out.lock().await;
        sink.write_all(&bytes).await?;
        sink.flush().await?;
        total += bytes.len() as u64;
    }

    Ok(total)
}

/// Copy `io` into a writer the caller owns, closing it at EOF.
pub async fn feed<A, W>(io: A, sink: &mut W) -> tokio::io::Result<u64>
where
    A: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut frames = FramedRead::with_capacity(io, BytesCodec::new(), 8 * 1024);
    let mut total = 0u64;

    while let Some(frame) = frames.next().await {
        let bytes = frame?;
        sink.write_all(&bytes).await?;
        sink.flush().await?;
        total += bytes.len() as u64;
    }
    sink.shutdown().await?;

    Ok(total)
}
