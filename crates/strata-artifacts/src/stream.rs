//! Sequential reconstruction of artifact bytes
//!
//! [`ArtifactChunkStream`] walks a manifest's chunks in order, holding at most
//! one chunk open at a time. Uncompressed chunks are streamed straight from
//! their file; zstd chunks are decoded into memory one at a time. Every chunk
//! is checked against its recorded length and SHA-256 as it is consumed.

use std::future::Future;
use std::io::{self, Cursor};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::fs::File;
use tokio::io::{AsyncRead, ReadBuf};
use tracing::warn;

use crate::chunk_store::ChunkStore;
use crate::codec::{ChunkCodec, CompressionKind};
use crate::hash::Sha256Hasher;
use crate::manifest::ArtifactChunkInfo;

type OpenFuture = Pin<Box<dyn Future<Output = io::Result<ChunkSource>> + Send>>;

enum ChunkSource {
    File(File),
    Memory(Cursor<Vec<u8>>),
}

impl AsyncRead for ChunkSource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ChunkSource::File(file) => Pin::new(file).poll_read(cx, buf),
            ChunkSource::Memory(cursor) => Pin::new(cursor).poll_read(cx, buf),
        }
    }
}

enum State {
    /// Between chunks
    Idle,
    Opening(OpenFuture),
    Reading {
        source: ChunkSource,
        hasher: Sha256Hasher,
        consumed: u64,
    },
    Done,
}

/// Forward-only reader over an artifact's chunks
pub struct ArtifactChunkStream {
    chunk_store: ChunkStore,
    chunks: Vec<ArtifactChunkInfo>,
    length: u64,
    position: u64,
    index: usize,
    state: State,
}

impl ArtifactChunkStream {
    pub fn new(chunk_store: ChunkStore, chunks: Vec<ArtifactChunkInfo>) -> Self {
        let length = chunks.iter().map(|c| u64::from(c.uncompressed_length)).sum();
        Self {
            chunk_store,
            chunks,
            length,
            position: 0,
            index: 0,
            state: State::Idle,
        }
    }

    /// Total number of bytes the stream yields.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Bytes yielded so far.
    pub fn position(&self) -> u64 {
        self.position
    }
}

async fn open_chunk(store: ChunkStore, info: ArtifactChunkInfo) -> io::Result<ChunkSource> {
    match info.compression {
        CompressionKind::None => Ok(ChunkSource::File(store.open_read(&info.hash).await?)),
        CompressionKind::Zstd => {
            let stored = store.read(&info.hash).await?;
            let expected = info.uncompressed_length as usize;
            let decoded = tokio::task::spawn_blocking(move || {
                ChunkCodec::decode(CompressionKind::Zstd, stored, expected)
            })
            .await
            .map_err(io::Error::other)??;
            Ok(ChunkSource::Memory(Cursor::new(decoded)))
        }
    }
}

fn verify_chunk(info: &ArtifactChunkInfo, consumed: u64, hasher: Sha256Hasher) -> io::Result<()> {
    if consumed != u64::from(info.uncompressed_length) {
        warn!(chunk = %info.hash.short_hex(), consumed, expected = info.uncompressed_length, "Chunk length mismatch");
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "chunk {} yielded {} bytes, expected {}",
                info.hash, consumed, info.uncompressed_length
            ),
        ));
    }

    let actual = hasher.finalize();
    if actual != info.hash {
        warn!(chunk = %info.hash.short_hex(), actual = %actual.short_hex(), "Chunk hash mismatch");
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("chunk {} content hashes to {}", info.hash, actual),
        ));
    }
    Ok(())
}

impl AsyncRead for ArtifactChunkStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            match &mut this.state {
                State::Idle => {
                    if this.index >= this.chunks.len() {
                        this.state = State::Done;
                        continue;
                    }
                    let info = this.chunks[this.index];
                    this.state = State::Opening(Box::pin(open_chunk(this.chunk_store.clone(), info)));
                }
                State::Opening(open) => match ready!(open.as_mut().poll(cx)) {
                    Ok(source) => {
                        this.state = State::Reading {
                            source,
                            hasher: Sha256Hasher::new(),
                            consumed: 0,
                        };
                    }
                    Err(e) => {
                        this.state = State::Done;
                        return Poll::Ready(Err(e));
                    }
                },
                State::Reading {
                    source,
                    hasher,
                    consumed,
                } => {
                    let before = buf.filled().len();
                    if let Err(e) = ready!(Pin::new(source).poll_read(cx, buf)) {
                        this.state = State::Done;
                        return Poll::Ready(Err(e));
                    }

                    let fresh = &buf.filled()[before..];
                    if fresh.is_empty() {
                        let finished = std::mem::take(hasher);
                        let consumed = *consumed;
                        let result = verify_chunk(&this.chunks[this.index], consumed, finished);
                        this.index += 1;
                        this.state = State::Idle;
                        if let Err(e) = result {
                            this.state = State::Done;
                            return Poll::Ready(Err(e));
                        }
                        continue;
                    }

                    hasher.update(fresh);
                    *consumed += fresh.len() as u64;
                    this.position += fresh.len() as u64;

                    if *consumed > u64::from(this.chunks[this.index].uncompressed_length) {
                        let err = io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("chunk {} is longer than recorded", this.chunks[this.index].hash),
                        );
                        this.state = State::Done;
                        return Poll::Ready(Err(err));
                    }
                    return Poll::Ready(Ok(()));
                }
                State::Done => return Poll::Ready(Ok(())),
            }
        }
    }
}
