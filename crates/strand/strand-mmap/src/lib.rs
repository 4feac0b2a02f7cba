use memmap2::{MmapMut, MmapOptions};
use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
};

/// A read-write mapping, either backed by a file (shared with other
/// processes) or anonymous (process-private, zero-filled).
pub struct MmapRegion {
    file: Option<File>,
    mmap: MmapMut,
}

impl MmapRegion {
    /// Create (or truncate) a file of `size_bytes` and map it read-write.
    /// The file's contents start zeroed.
    pub fn create_rw<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size_bytes)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            file: Some(file),
            mmap,
        })
    }

    /// Map an existing file read-write, at its current length.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            file: Some(file),
            mmap,
        })
    }

    /// Map `size_bytes` of zeroed, page-aligned anonymous memory.
    pub fn anonymous(size_bytes: usize) -> io::Result<Self> {
        let mmap = MmapOptions::new().len(size_bytes).map_anon()?;
        Ok(Self { file: None, mmap })
    }

    /// Base address of the mapping, stable until `self` is dropped.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Flush outstanding writes of a file-backed mapping to disk. A no-op for
    /// anonymous mappings.
    pub fn flush(&self) -> io::Result<()> {
        if self.file.is_some() {
            self.mmap.flush()
        } else {
            Ok(())
        }
    }
}
