//! Chunked delivery of a [`TransferJob`].
//!
//! Chunks are written strictly in order. Acknowledged writes are the
//! synchronisation points: one that fails aborts the job. An
//! unacknowledged write that fails is logged, counted in
//! [`TransferReport::dropped`] and skipped.
//!
//! Two tokens are watched. The caller's token is checked before every
//! chunk and ends the run with [`TransferOutcome::Cancelled`]. The link
//! token is cancelled when the connection goes away; it fails the run
//! with [`EpdError::PeerDisconnected`], even mid-write.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{EpdError, TransportError};
use crate::link::WriteKind;
use crate::protocol::{ChunkMarker, Framer, to_hex};
use crate::transfer::job::{JobKind, TransferJob};
use crate::transfer::progress::{
    TransferControl, TransferEvent, TransferOutcome, TransferProgress, TransferReport,
};

/// Where framed chunks go. The session implements this over the command
/// characteristic.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn write_chunk(&self, frame: Bytes, kind: WriteKind) -> Result<(), TransportError>;
}

pub struct TransferEngine<'a> {
    sink: &'a dyn ChunkSink,
    framer: Framer,
    link: CancellationToken,
}

impl<'a> TransferEngine<'a> {
    pub fn new(sink: &'a dyn ChunkSink, framer: Framer, link: CancellationToken) -> Self {
        Self { sink, framer, link }
    }

    pub fn framer(&mut self) -> &mut Framer {
        &mut self.framer
    }

    /// Write one already-framed buffer, racing the link token.
    pub async fn write(&self, frame: Bytes, kind: WriteKind) -> Result<(), EpdError> {
        if self.link.is_cancelled() {
            return Err(EpdError::PeerDisconnected);
        }
        tracing::trace!(kind = %kind, frame = %to_hex(&frame), "write");
        tokio::select! {
            biased;
            _ = self.link.cancelled() => Err(EpdError::PeerDisconnected),
            res = self.sink.write_chunk(frame, kind) => res.map_err(|e| write_error(e, kind)),
        }
    }

    /// Frame `payload` under `opcode` and send it as one acknowledged write.
    pub async fn command(&mut self, opcode: impl Into<u8>, payload: &[u8]) -> Result<(), EpdError> {
        let frame = self.framer.frame(opcode, payload)?;
        self.write(frame, WriteKind::Acknowledged).await
    }

    pub async fn run(
        &mut self,
        job: &TransferJob,
        ctl: &TransferControl,
    ) -> Result<TransferOutcome, EpdError> {
        let started = Instant::now();
        let total_chunks = job.chunk_count();
        let mut schedule = job.schedule();
        let mut report = TransferReport::default();

        tracing::debug!(
            job = %job.kind(),
            bytes = job.payload_len(),
            chunks = total_chunks,
            chunk_size = job.chunk_size(),
            ack_every = job.ack_every(),
            "transfer started"
        );

        for (index, chunk) in job.chunks().enumerate() {
            if ctl.is_cancelled() {
                report.elapsed = started.elapsed();
                tracing::info!(job = %job.kind(), chunk = index, "transfer cancelled");
                return Ok(TransferOutcome::Cancelled(report));
            }

            let frame = match job.kind() {
                JobKind::Command(opcode) => self.framer.frame(opcode, &chunk)?,
                JobKind::ImagePlane(plane) => self
                    .framer
                    .image_chunk(ChunkMarker::new(plane, index == 0), &chunk)?,
            };
            let kind = schedule.next_kind(index);

            match self.write(frame, kind).await {
                Ok(()) if kind.is_acknowledged() => report.acknowledged += 1,
                Ok(()) => {}
                Err(EpdError::TransportWriteFailed {
                    kind: WriteKind::Unacknowledged,
                    source,
                }) => {
                    tracing::warn!(job = %job.kind(), chunk = index, "unacknowledged write failed: {source}");
                    report.dropped += 1;
                }
                Err(e) => {
                    tracing::warn!(job = %job.kind(), chunk = index, "transfer aborted: {e}");
                    return Err(e);
                }
            }

            report.chunks += 1;
            report.bytes += chunk.len();
            ctl.emit(TransferEvent::Progress(TransferProgress {
                job: job.kind(),
                chunk: index,
                total_chunks,
                bytes_sent: report.bytes,
                total_bytes: job.payload_len(),
                elapsed: started.elapsed(),
            }));
        }

        report.elapsed = started.elapsed();
        tracing::debug!(
            job = %job.kind(),
            acknowledged = report.acknowledged,
            dropped = report.dropped,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "transfer completed"
        );
        ctl.emit(TransferEvent::Completed {
            job: job.kind(),
            report: report.clone(),
        });
        Ok(TransferOutcome::Completed(report))
    }
}

fn write_error(e: TransportError, kind: WriteKind) -> EpdError {
    match e {
        TransportError::Disconnected => EpdError::PeerDisconnected,
        source => EpdError::TransportWriteFailed { kind, source },
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::protocol::Opcode;
    use crate::raster::{EncodedPlane, Plane};

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<(Bytes, WriteKind)>>,
        fail_at: Option<usize>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl RecordingSink {
        fn writes(&self) -> Vec<(Bytes, WriteKind)> {
            self.writes.lock().unwrap().clone()
        }

        fn acks(&self) -> usize {
            self.writes()
                .iter()
                .filter(|(_, k)| k.is_acknowledged())
                .count()
        }
    }

    #[async_trait]
    impl ChunkSink for RecordingSink {
        async fn write_chunk(&self, frame: Bytes, kind: WriteKind) -> Result<(), TransportError> {
            let index = {
                let mut w = self.writes.lock().unwrap();
                w.push((frame, kind));
                w.len() - 1
            };
            if let Some((n, token)) = &self.cancel_after {
                if index + 1 == *n {
                    token.cancel();
                }
            }
            if self.fail_at == Some(index) {
                return Err(TransportError::Io("gatt error".into()));
            }
            Ok(())
        }
    }

    fn engine(sink: &RecordingSink, mtu: usize) -> TransferEngine<'_> {
        TransferEngine::new(sink, Framer::new(mtu).unwrap(), CancellationToken::new())
    }

    fn payload(n: usize) -> Bytes {
        Bytes::from((0..n).map(|i| i as u8).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn bulk_ack_count() {
        let sink = RecordingSink::default();
        let job = TransferJob::bulk(Opcode::SendData, payload(1000), 38, 5).unwrap();
        let out = engine(&sink, 39).run(&job, &TransferControl::new()).await.unwrap();

        // 27 chunks, acknowledged at 4, 9, 14, 19, 24 and the last.
        assert_eq!(job.chunk_count(), 27);
        assert_eq!(sink.acks(), 6);
        assert_eq!(out.report().acknowledged, 6);
        assert_eq!(out.report().bytes, 1000);
        assert!(out.is_completed());

        let writes = sink.writes();
        assert!(writes.iter().all(|(f, _)| f[0] == 0x04));
        let body: Vec<u8> = writes.iter().flat_map(|(f, _)| f[1..].to_vec()).collect();
        assert_eq!(body, payload(1000).to_vec());
    }

    #[tokio::test]
    async fn image_plane_markers() {
        let sink = RecordingSink::default();
        let plane = EncodedPlane {
            plane: Plane::Red,
            bytes: payload(40),
        };
        let job = TransferJob::image_plane(&plane, 18, 20).unwrap();
        engine(&sink, 20).run(&job, &TransferControl::new()).await.unwrap();

        let writes = sink.writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(&writes[0].0[..2], &[0x30, 0x00]);
        assert_eq!(&writes[1].0[..2], &[0x30, 0xF0]);
        assert_eq!(&writes[2].0[..2], &[0x30, 0xF0]);
        assert_eq!(writes[2].0.len(), 2 + 4);
    }

    #[tokio::test]
    async fn oversized_chunk_fails_fast() {
        let sink = RecordingSink::default();
        let job = TransferJob::bulk(Opcode::SendData, payload(40), 20, 5).unwrap();
        let err = engine(&sink, 20)
            .run(&job, &TransferControl::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EpdError::OversizedFrame { size: 21, mtu: 20 }));
        assert!(sink.writes().is_empty());
    }

    #[tokio::test]
    async fn failed_unacknowledged_write_continues() {
        let sink = RecordingSink {
            fail_at: Some(1),
            ..Default::default()
        };
        let job = TransferJob::bulk(Opcode::SendData, payload(100), 19, 5).unwrap();
        let out = engine(&sink, 20).run(&job, &TransferControl::new()).await.unwrap();
        assert!(out.is_completed());
        assert_eq!(out.report().dropped, 1);
        assert_eq!(sink.writes().len(), 6);
    }

    #[tokio::test]
    async fn failed_acknowledged_write_aborts() {
        let sink = RecordingSink {
            fail_at: Some(4),
            ..Default::default()
        };
        let (ctl, mut rx) = TransferControl::with_progress();
        let job = TransferJob::bulk(Opcode::SendData, payload(200), 19, 5).unwrap();
        let err = engine(&sink, 20).run(&job, &ctl).await.unwrap_err();
        assert!(matches!(
            err,
            EpdError::TransportWriteFailed {
                kind: WriteKind::Acknowledged,
                ..
            }
        ));
        assert_eq!(sink.writes().len(), 5);

        drop(ctl);
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| matches!(e, TransferEvent::Progress(_))));
    }

    #[tokio::test]
    async fn cancellation_between_chunks() {
        let (ctl, mut rx) = TransferControl::with_progress();
        let sink = RecordingSink {
            cancel_after: Some((3, ctl.cancel_token())),
            ..Default::default()
        };
        let job = TransferJob::bulk(Opcode::SendData, payload(200), 19, 5).unwrap();
        let out = engine(&sink, 20).run(&job, &ctl).await.unwrap();

        assert!(matches!(out, TransferOutcome::Cancelled(ref r) if r.chunks == 3));
        assert_eq!(sink.writes().len(), 3);

        drop(ctl);
        let mut completed = false;
        while let Some(ev) = rx.recv().await {
            completed |= matches!(ev, TransferEvent::Completed { .. });
        }
        assert!(!completed);
    }

    #[tokio::test]
    async fn link_loss_fails_job() {
        let sink = RecordingSink::default();
        let link = CancellationToken::new();
        let mut engine = TransferEngine::new(&sink, Framer::new(20).unwrap(), link.clone());
        link.cancel();
        let job = TransferJob::bulk(Opcode::SendData, payload(50), 19, 5).unwrap();
        let err = engine.run(&job, &TransferControl::new()).await.unwrap_err();
        assert!(matches!(err, EpdError::PeerDisconnected));
        assert!(sink.writes().is_empty());
    }

    #[tokio::test]
    async fn progress_then_completed() {
        let sink = RecordingSink::default();
        let (ctl, mut rx) = TransferControl::with_progress();
        let job = TransferJob::bulk(Opcode::SendData, payload(50), 19, 5).unwrap();
        engine(&sink, 20).run(&job, &ctl).await.unwrap();
        drop(ctl);

        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert_eq!(events.len(), 4);
        let TransferEvent::Progress(last) = &events[2] else {
            panic!("expected progress");
        };
        assert_eq!((last.chunk, last.total_chunks, last.bytes_sent), (2, 3, 50));
        assert!(matches!(
            events[3],
            TransferEvent::Completed { ref report, .. } if report.chunks == 3
        ));
    }
}
