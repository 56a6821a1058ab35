//! Line-framed JSON over a split byte stream.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::codec::Error;
use crate::codec::Result;

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// One JSON value per line in each direction.
///
/// Reads and writes lock separate halves, so a blocked reader never holds up
/// a writer. Closing wakes any blocked reader.
pub(crate) struct LineStream {
    reader: Mutex<Reader>,
    writer: Mutex<Writer>,
    closed: CancellationToken,
}

impl LineStream {
    pub(crate) fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let read_half: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);
        let write_half: Writer = Box::new(write_half);

        Self {
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(write_half),
            closed: CancellationToken::new(),
        }
    }

    /// Reads the next non-blank line and decodes it.
    pub(crate) async fn read<T: DeserializeOwned>(&self) -> Result<T> {
        if self.closed.is_cancelled() {
            return Err(Error::Closed);
        }

        let mut reader = self.reader.lock().await;
        let mut line = String::new();
        loop {
            line.clear();
            let n = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(Error::Closed),
                n = reader.read_line(&mut line) => n?,
            };
            if n == 0 {
                return Err(Error::Eof);
            }
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&line).map_err(|e| Error::Decode(e.to_string()));
        }
    }

    /// Encodes `value` and writes it as one line.
    pub(crate) async fn write<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let mut bytes = serde_json::to_vec(value).map_err(|e| Error::Encode(e.to_string()))?;
        bytes.push(b'\n');

        if self.closed.is_cancelled() {
            return Err(Error::Closed);
        }
        let mut writer = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(Error::Closed),
            writer = self.writer.lock() => writer,
        };

        // A peer that stops reading can stall the write forever; closing must still win.
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::Closed),
            written = async {
                writer.write_all(&bytes).await?;
                writer.flush().await?;
                Ok::<(), Error>(())
            } => written,
        }
    }

    /// Shuts the write half down and wakes any blocked reader or writer. Idempotent.
    pub(crate) async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        // Cancel first: a stalled writer gives up the lock once it sees the token.
        self.closed.cancel();

        let mut writer = self.writer.lock().await;
        match writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
