//! FastCDC-style content-defined chunking
//!
//! Boundaries come from a gear rolling hash with normalized chunking: a
//! stricter mask below the average size and a looser one above it pulls chunk
//! sizes toward the average. The gear table and the cut rule are fixed, so
//! identical input always yields identical boundaries.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::ChunkingConfig;
use crate::error::ArtifactError;

/// Gear values, one per byte value.
pub const GEAR_TABLE: [u64; 256] = build_gear_table();

const fn build_gear_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut i = 0;
    while i < 256 {
        seed ^= seed << 7;
        seed ^= seed >> 9;
        seed ^= seed << 8;
        table[i] = seed;
        i += 1;
    }
    table
}

/// Content-defined chunk boundary detector
#[derive(Debug, Clone)]
pub struct FastCdcChunker {
    config: ChunkingConfig,
    mask_small: u64,
    mask_large: u64,
}

impl FastCdcChunker {
    /// Validate the sizes and derive the cut masks.
    pub fn new(config: ChunkingConfig) -> Result<Self, ArtifactError> {
        config.validate()?;

        let bits = config.avg_chunk_size.ilog2();
        if !(2..=62).contains(&bits) {
            return Err(ArtifactError::invalid_config(format!(
                "avg_chunk_size {} is out of range (log2 must be within 2..=62)",
                config.avg_chunk_size
            )));
        }

        Ok(Self {
            config,
            mask_small: (1u64 << (bits - 1)) - 1,
            mask_large: (1u64 << (bits + 1)) - 1,
        })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Start chunking an async byte source.
    pub fn stream<R: AsyncRead + Unpin>(&self, reader: R) -> ChunkStream<R> {
        let read_size = self.config.effective_read_buffer();
        ChunkStream {
            reader,
            scanner: self.scanner(),
            read_buf: vec![0u8; read_size],
            buf_pos: 0,
            buf_len: 0,
            chunk: BytesMut::with_capacity(self.config.max_chunk_size),
            finished: false,
        }
    }

    /// Lengths of the chunks `data` splits into, in order.
    pub fn cut_points(&self, data: &[u8]) -> Vec<usize> {
        let mut scanner = self.scanner();
        let mut lengths = Vec::new();
        let mut rest = data;

        while !rest.is_empty() {
            match scanner.scan(rest) {
                Some(consumed) => {
                    lengths.push(scanner.take_completed());
                    rest = &rest[consumed..];
                }
                None => break,
            }
        }

        if scanner.pending > 0 {
            lengths.push(scanner.pending);
        }
        lengths
    }

    fn scanner(&self) -> BoundaryScanner {
        BoundaryScanner {
            min: self.config.min_chunk_size,
            avg: self.config.avg_chunk_size,
            max: self.config.max_chunk_size,
            mask_small: self.mask_small,
            mask_large: self.mask_large,
            pending: 0,
            completed: 0,
            rolling: 0,
        }
    }
}

/// Rolling-hash state for the chunk being accumulated.
#[derive(Debug)]
struct BoundaryScanner {
    min: usize,
    avg: usize,
    max: usize,
    mask_small: u64,
    mask_large: u64,
    /// Bytes seen since the last cut
    pending: usize,
    /// Length of the chunk closed by the last cut
    completed: usize,
    rolling: u64,
}

impl BoundaryScanner {
    /// Feed bytes until a cut. Returns how many bytes of `data` belong to the
    /// chunk that was just closed, or `None` if all of `data` was absorbed.
    fn scan(&mut self, data: &[u8]) -> Option<usize> {
        for (i, &byte) in data.iter().enumerate() {
            self.pending += 1;
            self.rolling = (self.rolling >> 1).wrapping_add(GEAR_TABLE[byte as usize]);

            if self.pending < self.min {
                continue;
            }

            let cut = if self.pending >= self.max {
                true
            } else if self.pending <= self.avg {
                self.rolling & self.mask_small == 0
            } else {
                self.rolling & self.mask_large == 0
            };

            if cut {
                self.completed = self.pending;
                self.pending = 0;
                self.rolling = 0;
                return Some(i + 1);
            }
        }
        None
    }

    fn take_completed(&mut self) -> usize {
        std::mem::take(&mut self.completed)
    }
}

/// Lazy, finite, non-restartable sequence of chunks read from `R`
pub struct ChunkStream<R> {
    reader: R,
    scanner: BoundaryScanner,
    read_buf: Vec<u8>,
    buf_pos: usize,
    buf_len: usize,
    chunk: BytesMut,
    finished: bool,
}

impl<R: AsyncRead + Unpin> ChunkStream<R> {
    /// Next chunk, or `None` once the source is exhausted.
    ///
    /// The final chunk may be shorter than `min_chunk_size`. Source I/O
    /// errors are returned as-is.
    pub async fn next_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            if self.buf_pos == self.buf_len {
                let read = self.reader.read(&mut self.read_buf).await?;
                if read == 0 {
                    self.finished = true;
                    if self.chunk.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(self.chunk.split().freeze()));
                }
                self.buf_pos = 0;
                self.buf_len = read;
            }

            let available = &self.read_buf[self.buf_pos..self.buf_len];
            match self.scanner.scan(available) {
                Some(consumed) => {
                    self.chunk.extend_from_slice(&available[..consumed]);
                    self.buf_pos += consumed;
                    self.scanner.take_completed();
                    return Ok(Some(self.chunk.split().freeze()));
                }
                None => {
                    self.chunk.extend_from_slice(available);
                    self.buf_pos = self.buf_len;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic LCG byte pattern shared with the golden vectors below.
    fn lcg_bytes(len: usize) -> Vec<u8> {
        let mut x: u32 = 1;
        (0..len)
            .map(|_| {
                x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (x >> 16) as u8
            })
            .collect()
    }

    fn small_config() -> ChunkingConfig {
        ChunkingConfig {
            min_chunk_size: 256,
            avg_chunk_size: 1024,
            max_chunk_size: 4096,
            read_buffer_size: 4096,
        }
    }

    async fn collect(chunker: &FastCdcChunker, data: &[u8]) -> Vec<Bytes> {
        let mut stream = chunker.stream(data);
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next_chunk().await.unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[test]
    fn test_gear_table_golden_values() {
        assert_eq!(GEAR_TABLE[0], 0x4ca9_b48d_4055_e2ae);
        assert_eq!(GEAR_TABLE[1], 0x67b4_1fa8_6df6_13f4);
        assert_eq!(GEAR_TABLE[255], 0x13e4_3f83_4ce7_5d6a);
    }

    #[test]
    fn test_cut_points_golden_values() {
        let chunker = FastCdcChunker::new(small_config()).unwrap();
        let lengths = chunker.cut_points(&lcg_bytes(65_536));

        assert_eq!(lengths.len(), 71);
        assert_eq!(&lengths[..8], &[718, 282, 2036, 616, 281, 309, 305, 555]);
        assert_eq!(lengths.iter().sum::<usize>(), 65_536);
    }

    #[test]
    fn test_avg_out_of_range_rejected() {
        let config = ChunkingConfig {
            min_chunk_size: 1,
            avg_chunk_size: 3,
            max_chunk_size: 8,
            read_buffer_size: 16,
        };
        assert!(matches!(
            FastCdcChunker::new(config),
            Err(ArtifactError::InvalidConfig(_))
        ));

        let config = ChunkingConfig {
            min_chunk_size: 1,
            avg_chunk_size: 4,
            max_chunk_size: 8,
            read_buffer_size: 16,
        };
        assert!(FastCdcChunker::new(config).is_ok());
    }

    #[test]
    fn test_invalid_sizes_rejected_eagerly() {
        let config = ChunkingConfig {
            min_chunk_size: 2048,
            avg_chunk_size: 1024,
            max_chunk_size: 4096,
            read_buffer_size: 4096,
        };
        assert!(FastCdcChunker::new(config).is_err());
    }

    #[tokio::test]
    async fn test_stream_matches_cut_points() {
        let chunker = FastCdcChunker::new(small_config()).unwrap();
        let data = lcg_bytes(65_536);

        let streamed: Vec<usize> = collect(&chunker, &data).await.iter().map(Bytes::len).collect();
        assert_eq!(streamed, chunker.cut_points(&data));
    }

    #[tokio::test]
    async fn test_read_buffer_size_does_not_move_boundaries() {
        let data = lcg_bytes(40_000);
        let reference = FastCdcChunker::new(small_config()).unwrap().cut_points(&data);

        for read_buffer_size in [1, 4096, 100_000] {
            let config = ChunkingConfig {
                read_buffer_size,
                ..small_config()
            };
            let chunker = FastCdcChunker::new(config).unwrap();
            let lengths: Vec<usize> =
                collect(&chunker, &data).await.iter().map(Bytes::len).collect();
            assert_eq!(lengths, reference, "read_buffer_size={read_buffer_size}");
        }
    }

    #[tokio::test]
    async fn test_chunks_cover_input_within_bounds() {
        let config = small_config();
        let chunker = FastCdcChunker::new(config.clone()).unwrap();
        let data = lcg_bytes(3 * config.max_chunk_size + 7);

        let chunks = collect(&chunker, &data).await;
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(joined, data);

        let (last, body) = chunks.split_last().unwrap();
        for chunk in body {
            assert!(chunk.len() >= config.min_chunk_size);
            assert!(chunk.len() <= config.max_chunk_size);
        }
        assert!(last.len() <= config.max_chunk_size);
    }

    #[tokio::test]
    async fn test_empty_and_short_inputs() {
        let chunker = FastCdcChunker::new(small_config()).unwrap();

        assert!(collect(&chunker, &[]).await.is_empty());
        assert!(chunker.cut_points(&[]).is_empty());

        let short = lcg_bytes(255);
        let chunks = collect(&chunker, &short).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref(), short.as_slice());
    }

    #[test]
    fn test_constant_input_within_bounds() {
        let config = small_config();
        let chunker = FastCdcChunker::new(config.clone()).unwrap();
        // A constant byte drives the rolling hash to a fixed point; whether
        // that point satisfies a mask decides the cut, so only check bounds.
        let data = vec![0xAAu8; 5 * config.max_chunk_size];
        let lengths = chunker.cut_points(&data);
        assert_eq!(lengths.iter().sum::<usize>(), data.len());
        assert!(lengths.iter().all(|&l| l <= config.max_chunk_size));
    }

    #[test]
    fn test_fixed_size_when_min_equals_max() {
        let config = ChunkingConfig {
            min_chunk_size: 1024,
            avg_chunk_size: 1024,
            max_chunk_size: 1024,
            read_buffer_size: 4096,
        };
        let chunker = FastCdcChunker::new(config).unwrap();
        let lengths = chunker.cut_points(&lcg_bytes(2500));
        assert_eq!(lengths, vec![1024, 1024, 452]);
    }

    #[tokio::test]
    async fn test_stream_exhausted_stays_exhausted() {
        let chunker = FastCdcChunker::new(small_config()).unwrap();
        let data = lcg_bytes(10);
        let mut stream = chunker.stream(data.as_slice());
        assert!(stream.next_chunk().await.unwrap().is_some());
        assert!(stream.next_chunk().await.unwrap().is_none());
        assert!(stream.next_chunk().await.unwrap().is_none());
    }
}
