//! Wire format for particles migrating between ranks
//!
//! One buffer per destination rank:
//! `[count: u64][n_runtime_real: u32][n_runtime_int: u32]` followed by
//! `count` records of
//! `[level, grid, tile: u32][pos][rdata][id: i64][cpu: i32][idata][real][int][runtime real][runtime int]`.
//! Fields are native-endian; both ends run the same build.

use super::ParticleRecord;
use crate::container::TileKey;
use bytemuck::Pod;
use parcel_comm::CommError;
use std::mem::size_of;

pub(crate) struct RecordWriter {
    buf: Vec<u8>,
    count: u64,
    n_runtime_real: u32,
    n_runtime_int: u32,
}

fn put<T: Pod>(buf: &mut Vec<u8>, values: &[T]) {
    buf.extend_from_slice(bytemuck::cast_slice(values));
}

impl RecordWriter {
    pub(crate) fn new(n_runtime_real: usize, n_runtime_int: usize) -> Self {
        Self {
            buf: Vec::new(),
            count: 0,
            n_runtime_real: n_runtime_real as u32,
            n_runtime_int: n_runtime_int as u32,
        }
    }

    pub(crate) fn len(&self) -> u64 {
        self.count
    }

    pub(crate) fn push<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize>(
        &mut self,
        key: TileKey,
        rec: &ParticleRecord<NSR, NSI, NAR, NAI>,
    ) {
        debug_assert_eq!(rec.runtime_real.len(), self.n_runtime_real as usize);
        debug_assert_eq!(rec.runtime_int.len(), self.n_runtime_int as usize);
        let p = &rec.particle;
        put(&mut self.buf, &[key.level as u32, key.grid as u32, key.tile as u32]);
        put(&mut self.buf, &p.pos);
        put(&mut self.buf, &p.rdata);
        put(&mut self.buf, &[p.id]);
        put(&mut self.buf, &[p.cpu]);
        put(&mut self.buf, &p.idata);
        put(&mut self.buf, &rec.real);
        put(&mut self.buf, &rec.int);
        put(&mut self.buf, &rec.runtime_real);
        put(&mut self.buf, &rec.runtime_int);
        self.count += 1;
    }

    /// Encoded buffer; empty when nothing was pushed.
    pub(crate) fn finish(self) -> Vec<u8> {
        if self.count == 0 {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(16 + self.buf.len());
        put(&mut out, &[self.count]);
        put(&mut out, &[self.n_runtime_real, self.n_runtime_int]);
        out.extend_from_slice(&self.buf);
        out
    }
}

/// Encoded size of one record.
fn record_size<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize>(
    n_runtime_real: usize,
    n_runtime_int: usize,
) -> usize {
    let reals = 3 + NSR + NAR + n_runtime_real;
    let ints = 3 + 1 + NSI + NAI + n_runtime_int;
    reals * size_of::<f64>() + ints * size_of::<u32>() + size_of::<i64>()
}

struct Reader<'a> {
    bytes: &'a [u8],
    at: usize,
    peer: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CommError> {
        let end = self.at + n;
        if end > self.bytes.len() {
            return Err(CommError::Malformed {
                peer: self.peer,
                reason: format!("truncated particle buffer: need {end} bytes, have {}", self.bytes.len()),
            });
        }
        let slice = &self.bytes[self.at..end];
        self.at = end;
        Ok(slice)
    }

    fn read<T: Pod>(&mut self) -> Result<T, CommError> {
        Ok(bytemuck::pod_read_unaligned(self.take(size_of::<T>())?))
    }

    fn read_into<T: Pod>(&mut self, out: &mut [T]) -> Result<(), CommError> {
        for value in out.iter_mut() {
            *value = self.read()?;
        }
        Ok(())
    }
}

/// Decode a buffer produced by [`RecordWriter`] on rank `peer`.
pub(crate) fn decode<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize>(
    bytes: &[u8],
    peer: usize,
    n_runtime_real: usize,
    n_runtime_int: usize,
) -> Result<Vec<(TileKey, ParticleRecord<NSR, NSI, NAR, NAI>)>, CommError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let mut r = Reader { bytes, at: 0, peer };
    let count: u64 = r.read()?;
    let their_real: u32 = r.read()?;
    let their_int: u32 = r.read()?;
    if their_real as usize != n_runtime_real || their_int as usize != n_runtime_int {
        return Err(CommError::Malformed {
            peer,
            reason: format!(
                "runtime components differ: sender has {their_real} real / {their_int} int, \
                 receiver has {n_runtime_real} / {n_runtime_int}"
            ),
        });
    }

    let room = (bytes.len() - r.at) / record_size::<NSR, NSI, NAR, NAI>(n_runtime_real, n_runtime_int);
    if count > room as u64 {
        return Err(CommError::Malformed {
            peer,
            reason: format!("header claims {count} particles but the buffer holds at most {room}"),
        });
    }

    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut key = [0u32; 3];
        r.read_into(&mut key)?;
        let mut rec = ParticleRecord::<NSR, NSI, NAR, NAI>::default();
        rec.fit_runtime(n_runtime_real, n_runtime_int);
        let p = &mut rec.particle;
        r.read_into(&mut p.pos)?;
        r.read_into(&mut p.rdata)?;
        p.id = r.read()?;
        p.cpu = r.read()?;
        r.read_into(&mut p.idata)?;
        r.read_into(&mut rec.real)?;
        r.read_into(&mut rec.int)?;
        r.read_into(&mut rec.runtime_real)?;
        r.read_into(&mut rec.runtime_int)?;
        let key = TileKey {
            level: key[0] as usize,
            grid: key[1] as usize,
            tile: key[2] as usize,
        };
        out.push((key, rec));
    }
    if r.at != bytes.len() {
        return Err(CommError::Malformed {
            peer,
            reason: format!("{} trailing bytes after {count} particles", bytes.len() - r.at),
        });
    }
    Ok(out)
}
