//! Synchronous invoke bridge for the child program.
//!
//! The Node.js runtime cannot block on a socket, so the SDK performs
//! synchronous invokes over a pair of FIFOs instead: it writes a
//! length-prefixed `InvokeRequest` into the request pipe and blocks reading
//! the length-prefixed `InvokeResponse` from the response pipe. The host owns
//! the other ends, forwarding each request to the engine monitor as an
//! ordinary `Invoke` RPC.
//!
//! Requests are handled strictly in arrival order on a single consumer loop;
//! the child serializes its own writes, and parallelism here would break its
//! framing assumptions.
//!
//! Both pipes live in a fresh temporary directory whose lifetime is tied to
//! the Run invocation; dropping `SyncInvokes` removes it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::BytesMut;
use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use prost::Message;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tonic::transport::Channel;

use crate::error::{HostError, HostResult};
use crate::grpc::{InvokeResponse, ResourceInvokeRequest, ResourceMonitorClient};

/// Pipe the child writes invoke requests into.
pub const REQUEST_PIPE: &str = "invoke_req_pipe";
/// Pipe the child reads invoke responses from.
pub const RESPONSE_PIPE: &str = "invoke_res_pipe";

/// The FIFO pair backing synchronous invokes for one Run.
pub struct SyncInvokes {
    dir: TempDir,
}

impl SyncInvokes {
    /// Creates the temporary directory and both FIFOs.
    pub fn create() -> HostResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("pulumi-node-pipes")
            .tempdir()?;
        for name in [REQUEST_PIPE, RESPONSE_PIPE] {
            mkfifo(&dir.path().join(name), Mode::S_IRWXU)
                .map_err(|errno| HostError::Io(errno.into()))?;
        }
        Ok(Self { dir })
    }

    /// The directory handed to the child via `--sync`.
    pub fn directory(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the serving loop as a detached future so the caller can spawn
    /// it while retaining ownership of the pipe directory.
    pub fn serve(
        &self,
        monitor: ResourceMonitorClient<Channel>,
    ) -> impl std::future::Future<Output = HostResult<()>> {
        let request_path = self.dir.path().join(REQUEST_PIPE);
        let response_path = self.dir.path().join(RESPONSE_PIPE);
        serve_loop(request_path, response_path, monitor)
    }
}

async fn serve_loop(
    request_path: PathBuf,
    response_path: PathBuf,
    mut monitor: ResourceMonitorClient<Channel>,
) -> HostResult<()> {
    let mut reader = pipe::OpenOptions::new().open_receiver(&request_path)?;
    // Opened lazily: the write end can only be opened once the child has the
    // read end open, which is guaranteed after its first request.
    let mut writer: Option<pipe::Sender> = None;
    // A FIFO read end reports EOF until the first writer opens it; only an
    // EOF after the child connected means the child is gone.
    let mut saw_writer = false;

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => saw_writer = true,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                if saw_writer {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                continue;
            }
            Err(err) => return Err(err.into()),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        let request = ResourceInvokeRequest::decode(body.as_slice())?;

        tracing::debug!(token = %request.tok, "forwarding sync invoke");
        let response = monitor.invoke(request).await?.into_inner();

        let frame = encode_frame(&response)?;
        if writer.is_none() {
            writer = Some(open_sender(&response_path).await?);
        }
        if let Some(writer) = writer.as_mut() {
            writer.write_all(&frame).await?;
        }
    }
}

fn encode_frame(response: &InvokeResponse) -> HostResult<BytesMut> {
    let len = response.encoded_len();
    let mut frame = BytesMut::with_capacity(len + 4);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    response.encode(&mut frame)?;
    Ok(frame)
}

/// Opens the response pipe for writing, waiting for the child to open the
/// read end first.
async fn open_sender(path: &Path) -> HostResult<pipe::Sender> {
    loop {
        match pipe::OpenOptions::new().open_sender(path) {
            Ok(sender) => return Ok(sender),
            Err(err) if err.raw_os_error() == Some(Errno::ENXIO as i32) => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileTypeExt;

    #[test]
    fn create_makes_both_fifos() {
        let pipes = SyncInvokes::create().unwrap();
        for name in [REQUEST_PIPE, RESPONSE_PIPE] {
            let metadata = std::fs::metadata(pipes.directory().join(name)).unwrap();
            assert!(metadata.file_type().is_fifo(), "{name} is not a FIFO");
        }
    }

    #[test]
    fn directory_is_removed_on_drop() {
        let pipes = SyncInvokes::create().unwrap();
        let dir = pipes.directory().to_path_buf();
        assert!(dir.exists());
        drop(pipes);
        assert!(!dir.exists());
    }

    #[test]
    fn frames_carry_a_big_endian_length_prefix() {
        let response = InvokeResponse {
            r#return: None,
            failures: Vec::new(),
        };
        let frame = encode_frame(&response).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
    }
}
