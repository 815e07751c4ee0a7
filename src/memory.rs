use anyhow::ensure;
use bytes::Bytes;

/// Read access to the inferior's memory.
///
/// The inferior is stopped while the evaluator runs, so implementations are
/// free to serve reads from a cache; [`MemoryReader::cache_region`] is the
/// hint the map decoders emit before walking a bucket or a group.
pub trait MemoryReader {
    /// Read `len` bytes at `addr`.
    fn read_bytes(&self, addr: u64, len: usize) -> anyhow::Result<Bytes>;

    /// Announce that `[addr, addr + len)` is about to be read repeatedly.
    fn cache_region(&self, _addr: u64, _len: usize) {}

    /// Read a little-endian unsigned integer of `size` bytes.
    fn read_unsigned(&self, addr: u64, size: usize) -> anyhow::Result<u64> {
        ensure!(size <= 8, "unsigned read of {size} bytes");
        let bytes = self.read_bytes(addr, size)?;
        ensure!(bytes.len() == size, "short read at {addr:#x}");
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(buf))
    }
}
