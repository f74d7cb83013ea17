//! Streaming catalog transformation
//!
//! Reads the upstream package array one record at a time and writes the
//! reduced catalog straight into a gzip encoder. Neither the input nor the
//! output is ever held in memory as a whole. The SHA-256 of the compressed
//! bytes is computed on the way out.

use crate::catalog::types::{BuildOutput, CatalogItem, UpstreamFormula, SCHEMA_VERSION};
use crate::error::{KegError, KegResult};
use chrono::{SecondsFormat, SubsecRound, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::{self, DeserializeSeed, SeqAccess, Visitor};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Wrap `src` in a gzip decoder if it starts with the gzip magic bytes.
pub fn maybe_gunzip<'a, R: Read + 'a>(src: R) -> KegResult<Box<dyn Read + 'a>> {
    let mut buffered = BufReader::new(src);
    let head = buffered
        .fill_buf()
        .map_err(|e| KegError::io("reading catalog payload", e))?;
    if head.starts_with(&GZIP_MAGIC) {
        debug!("Catalog payload is gzip-compressed");
        Ok(Box::new(GzDecoder::new(buffered)))
    } else {
        Ok(Box::new(buffered))
    }
}

/// Transform an upstream package array from `src` into a gzipped catalog in `dst`.
///
/// Fails without a usable result on a non-array top level, on any malformed
/// record, or when `cancel` fires; callers must discard whatever reached `dst`.
pub fn build_catalog<R: Read, W: Write>(
    cancel: &CancellationToken,
    src: R,
    dst: W,
) -> KegResult<BuildOutput> {
    let input = maybe_gunzip(src)?;
    let generated_at = Utc::now().trunc_subsecs(0);

    let mut gz = GzEncoder::new(HashingWriter::new(dst), Compression::default());
    write_raw(
        &mut gz,
        format!(
            r#"{{"schema":{},"generated_at":"{}","items":["#,
            SCHEMA_VERSION,
            generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
        .as_bytes(),
    )?;

    let mut sink = ItemSink {
        out: &mut gz,
        cancel,
        count: 0,
        failure: None,
    };
    let mut de = serde_json::Deserializer::from_reader(input);
    let streamed = (&mut sink).deserialize(&mut de).and_then(|()| de.end());
    let count = sink.count;
    if let Some(failure) = sink.failure.take() {
        return Err(failure);
    }
    streamed.map_err(|e| {
        if e.is_io() {
            KegError::io("reading catalog payload", e.into())
        } else {
            KegError::CatalogFormat(e.to_string())
        }
    })?;

    write_raw(&mut gz, format!(r#"],"count":{}}}"#, count).as_bytes())?;
    let hashing = gz
        .finish()
        .map_err(|e| KegError::io("finishing catalog gzip stream", e))?;
    let (sha256, size_bytes) = hashing.finish()?;

    Ok(BuildOutput {
        generated_at,
        count,
        sha256,
        size_bytes,
    })
}

fn write_raw<W: Write>(out: &mut W, bytes: &[u8]) -> KegResult<()> {
    out.write_all(bytes)
        .map_err(|e| KegError::io("writing catalog", e))
}

/// Receives array elements from the deserializer and writes reduced items.
struct ItemSink<'a, W: Write> {
    out: &'a mut W,
    cancel: &'a CancellationToken,
    count: usize,
    failure: Option<KegError>,
}

impl<'de, W: Write> DeserializeSeed<'de> for &mut ItemSink<'_, W> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, W: Write> Visitor<'de> for &mut ItemSink<'_, W> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON array of package records")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        loop {
            if self.cancel.is_cancelled() {
                self.failure = Some(KegError::Cancelled);
                return Err(de::Error::custom("catalog build cancelled"));
            }

            let Some(formula) = seq.next_element::<UpstreamFormula>()? else {
                return Ok(());
            };

            let item = CatalogItem::from(formula);
            let written = if self.count > 0 {
                self.out.write_all(b",")
            } else {
                Ok(())
            }
            .and_then(|()| serde_json::to_writer(&mut *self.out, &item).map_err(io::Error::from));

            if let Err(e) = written {
                let message = e.to_string();
                self.failure = Some(KegError::io("writing catalog", e));
                return Err(de::Error::custom(message));
            }
            self.count += 1;
        }
    }
}

/// Passes bytes through while hashing and counting them
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn finish(mut self) -> KegResult<(String, u64)> {
        self.inner
            .flush()
            .map_err(|e| KegError::io("flushing catalog output", e))?;
        Ok((hex::encode(self.hasher.finalize()), self.written))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
