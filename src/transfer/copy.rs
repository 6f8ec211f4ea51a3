//! Byte movers
//!
//! Streaming copies run as a spawned task that reports progress per chunk
//! and ends with exactly one `Finished` event. Buffered copies read the whole
//! source, then write it, while a simulation ticker stands in for progress.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::sftp::progress::{spawn_simulation, SpeedMeter};
use crate::sftp::{check_transfer_control, FileBackend, SftpError, TransferControl};

/// Per-chunk I/O bound; a dead session would otherwise hang the copy
const IO_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyProgress {
    pub transferred: u64,
    pub total: u64,
    /// Bytes per second
    pub speed: u64,
}

#[derive(Debug)]
pub enum CopyEvent {
    Progress(CopyProgress),
    Finished(Result<u64, SftpError>),
}

/// One file copy between two backends
#[derive(Clone)]
pub struct CopyJob {
    pub source: Arc<dyn FileBackend>,
    pub source_path: String,
    pub target: Arc<dyn FileBackend>,
    pub target_path: String,
    /// Expected size, used for progress only
    pub total: u64,
}

/// Start a streaming copy. The receiver yields progress, then `Finished`.
///
/// A cancelled copy drops both handles and removes the partial target.
pub fn spawn_stream_copy(
    job: CopyJob,
    chunk_size: usize,
    control: Arc<TransferControl>,
) -> mpsc::UnboundedReceiver<CopyEvent> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let result = run_stream_copy(&job, chunk_size, &control, &tx).await;
        if matches!(result, Err(SftpError::TransferCancelled)) {
            if let Err(e) = job.target.remove_file(&job.target_path).await {
                debug!("No partial file to clean up at {}: {}", job.target_path, e);
            }
        }
        let _ = tx.send(CopyEvent::Finished(result));
    });

    rx
}

async fn run_stream_copy(
    job: &CopyJob,
    chunk_size: usize,
    control: &TransferControl,
    tx: &mpsc::UnboundedSender<CopyEvent>,
) -> Result<u64, SftpError> {
    check_transfer_control(control)?;
    let mut reader = job.source.open_reader(&job.source_path).await?;
    let mut writer = job.target.open_writer(&job.target_path).await?;

    let mut buffer = vec![0u8; chunk_size.max(1)];
    let meter = SpeedMeter::start();
    let mut transferred = 0u64;

    loop {
        let read = tokio::select! {
            biased;
            _ = control.cancelled() => {
                info!("Copy to {} cancelled at {} bytes", job.target_path, transferred);
                return Err(SftpError::TransferCancelled);
            }
            read = tokio::time::timeout(IO_TIMEOUT, reader.read(&mut buffer)) => read,
        };

        let n = match read {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(SftpError::IoError(e)),
            Err(_) => {
                warn!("Read timeout after {:?} at {} bytes", IO_TIMEOUT, transferred);
                return Err(SftpError::TransferError(format!(
                    "Read timeout after {:?} - connection may be dead",
                    IO_TIMEOUT
                )));
            }
        };
        if n == 0 {
            break;
        }

        match tokio::time::timeout(IO_TIMEOUT, writer.write_all(&buffer[..n])).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(SftpError::IoError(e)),
            Err(_) => {
                warn!("Write timeout after {:?} at {} bytes", IO_TIMEOUT, transferred);
                return Err(SftpError::TransferError(format!("Write timeout after {:?}", IO_TIMEOUT)));
            }
        }

        transferred += n as u64;
        let _ = tx.send(CopyEvent::Progress(CopyProgress {
            transferred,
            total: job.total.max(transferred),
            speed: meter.speed(transferred),
        }));
    }

    writer.shutdown().await?;
    debug!("Streamed {} bytes to {}", transferred, job.target_path);
    Ok(transferred)
}

/// Read then write, reporting simulated progress until the write lands
pub async fn buffered_copy<F>(
    job: &CopyJob,
    rate_bps: u64,
    tick: Duration,
    control: &TransferControl,
    on_progress: F,
) -> Result<u64, SftpError>
where
    F: FnMut(u64, u64) + Send + 'static,
{
    check_transfer_control(control)?;
    let simulation = spawn_simulation(job.total, rate_bps, tick, on_progress);

    let copy = async {
        let data = job.source.read_file(&job.source_path).await?;
        check_transfer_control(control)?;
        job.target.write_file(&job.target_path, &data).await?;
        Ok::<u64, SftpError>(data.len() as u64)
    };

    let result = tokio::select! {
        biased;
        _ = control.cancelled() => {
            info!("Copy to {} cancelled", job.target_path);
            Err(SftpError::TransferCancelled)
        }
        result = copy => result,
    };
    simulation.stop();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBackend;
    use parking_lot::Mutex;

    fn job(source: &Arc<MemoryBackend>, target: &Arc<MemoryBackend>, total: u64) -> CopyJob {
        CopyJob {
            source: source.clone(),
            source_path: "/src/data.bin".into(),
            target: target.clone(),
            target_path: "/dst/data.bin".into(),
            total,
        }
    }

    fn backends() -> (Arc<MemoryBackend>, Arc<MemoryBackend>) {
        let source = Arc::new(MemoryBackend::new());
        source.add_file("/src/data.bin", b"0123456789");
        let target = Arc::new(MemoryBackend::new());
        target.add_dir("/dst");
        (source, target)
    }

    #[tokio::test]
    async fn test_stream_copy_reports_each_chunk() {
        let (source, target) = backends();
        let mut rx = spawn_stream_copy(job(&source, &target, 10), 4, Arc::new(TransferControl::new()));

        let mut seen = Vec::new();
        let result = loop {
            match rx.recv().await.unwrap() {
                CopyEvent::Progress(p) => seen.push(p.transferred),
                CopyEvent::Finished(result) => break result,
            }
        };
        assert_eq!(result.unwrap(), 10);
        assert_eq!(seen, vec![4, 8, 10]);
        assert_eq!(target.file("/dst/data.bin").unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_stream_copy_cancelled_before_start() {
        let (source, target) = backends();
        let control = Arc::new(TransferControl::new());
        control.cancel();
        let mut rx = spawn_stream_copy(job(&source, &target, 10), 4, control);

        match rx.recv().await.unwrap() {
            CopyEvent::Finished(Err(SftpError::TransferCancelled)) => {}
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(!target.exists("/dst/data.bin"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffered_copy_simulates_then_lands() {
        let (source, target) = backends();
        source.set_read_delay("/src/data.bin", Duration::from_millis(450));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let copied = buffered_copy(
            &job(&source, &target, 1_000),
            1_000,
            Duration::from_millis(100),
            &TransferControl::new(),
            move |bytes, _| sink.lock().push(bytes),
        )
        .await
        .unwrap();

        assert_eq!(copied, 10);
        assert_eq!(*seen.lock(), vec![100, 200, 300, 400]);
        assert_eq!(target.writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffered_copy_cancel_skips_write() {
        let (source, target) = backends();
        source.set_read_delay("/src/data.bin", Duration::from_secs(5));
        let control = Arc::new(TransferControl::new());

        let canceller = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            canceller.cancel();
        });

        let result = buffered_copy(
            &job(&source, &target, 1_000),
            1_000,
            Duration::from_millis(100),
            &control,
            |_, _| {},
        )
        .await;
        assert!(matches!(result, Err(SftpError::TransferCancelled)));
        assert_eq!(target.writes(), 0);
    }
}
