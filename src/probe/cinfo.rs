//! Reader for the `.cinfo` metadata files the xrootd proxy cache keeps beside
//! every cached data file.
//!
//! Layout (native endianness, no padding in the header):
//!
//! ```text
//! i32 version | i64 buffer_size | i32 status_bits | status array | i32 access_count
//! access records: time_t detach | i64 bytes_disk | i64 bytes_ram | i64 bytes_missed
//! ```
//!
//! Only version 0 is understood. Anything unexpected yields `(0, 0)` rather
//! than an error, since the cache rewrites these files while we read them.
use std::{
    ffi::c_long,
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    mem::size_of,
    path::Path,
};

const HEADER_SIZE: usize = size_of::<i32>() + size_of::<i64>() + size_of::<i32>();

/// One access record: a native `time_t` followed by three `i64` counters.
const ACCESS_RECORD_SIZE: usize = size_of::<c_long>() + 3 * size_of::<i64>();

/// Access statistics extracted from a `.cinfo` file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessInfo {
    pub access_count: u64,
    /// Detach time of the most recent access, in unix seconds.
    pub last_access: i64,
}

/// Reads the access count and most recent access time from a `.cinfo` file.
///
/// I/O errors opening or seeking the file are returned so callers can tell a
/// vanished file apart from a mangled one.
pub fn read_cinfo(path: &Path) -> io::Result<AccessInfo> {
    let mut file = File::open(path)?;

    let Some(header) = read_block::<HEADER_SIZE>(&mut file)? else {
        return Ok(AccessInfo::default());
    };
    let version = i32::from_ne_bytes(array_at(&header, 0));
    let status_bits = i32::from_ne_bytes(array_at(&header, 12));

    if version != 0 {
        return Ok(AccessInfo::default());
    }

    let status_bytes = (i64::from(status_bits) - 1).div_euclid(8) + 1;
    file.seek(SeekFrom::Current(status_bytes))?;

    let Some(count) = read_block::<4>(&mut file)? else {
        return Ok(AccessInfo::default());
    };
    let access_count = i32::from_ne_bytes(count);
    if access_count <= 0 {
        return Ok(AccessInfo::default());
    }

    let skip = (i64::from(access_count) - 1) * ACCESS_RECORD_SIZE as i64;
    file.seek(SeekFrom::Current(skip))?;

    let Some(record) = read_block::<ACCESS_RECORD_SIZE>(&mut file)? else {
        // Caught mid-update.
        return Ok(AccessInfo::default());
    };
    let last_access = c_long::from_ne_bytes(array_at(&record, 0)) as i64;

    Ok(AccessInfo {
        access_count: access_count as u64,
        last_access,
    })
}

/// Reads exactly `N` bytes, returning `None` on a short read.
fn read_block<const N: usize>(file: &mut File) -> io::Result<Option<[u8; N]>> {
    let mut buf = [0u8; N];
    match file.read_exact(&mut buf) {
        Ok(()) => Ok(Some(buf)),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(err) => Err(err),
    }
}

fn array_at<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}
