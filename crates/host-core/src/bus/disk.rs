//! Disk image table and sector controller.
//!
//! Images are registered once at startup and indexed in registration order.
//! The guest moves data one 512-byte sector at a time through an internal
//! sector buffer:
//!
//! ```text
//! 0x8000_1000 + id   read   sector count of disk `id` (0 when absent)
//! 0x8000_2000        read   number of host file drops seen this session
//! 0x8000_3000 + id   write  load sector `value` of disk `id` into the buffer
//! 0x8000_4000 + id   write  store the buffer into sector `value` of disk `id`
//! 0x8000_5000 + w    r/w    little-endian word `w` (0..128) of the buffer
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use super::{BusError, Peripheral};

/// Bytes per sector.
pub const SECTOR_SIZE: usize = 512;

/// First disk controller port.
pub const DISK_BASE: u32 = 0x8000_1000;
/// Last disk controller port.
pub const DISK_END: u32 = 0x8000_5FFF;

const SIZE_QUERY: u32 = 0x0000;
const DROP_COUNT: u32 = 0x1000;
const READ_SECTOR: u32 = 0x2000;
const WRITE_SECTOR: u32 = 0x3000;
const BUFFER_WORDS: u32 = 0x4000;
const REGISTER_SPAN: u32 = 0x1000;

#[allow(clippy::cast_possible_truncation)]
const WORDS_PER_SECTOR: u32 = (SECTOR_SIZE / 4) as u32;

/// Backing store for a disk image.
pub trait Storage: Read + Write + Seek {}

impl<T: Read + Write + Seek> Storage for T {}

/// One registered disk image.
pub struct DiskImage {
    label: String,
    backing: Box<dyn Storage>,
    size_bytes: u64,
}

impl std::fmt::Debug for DiskImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskImage")
            .field("label", &self.label)
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

impl DiskImage {
    /// Opens an image file read-write, falling back to read-only.
    ///
    /// # Errors
    ///
    /// Returns the I/O error when the file cannot be opened at all.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::PermissionDenied => {
                tracing::warn!(path = %path.display(), "disk image is read-only");
                File::open(path)?
            }
            Err(error) => return Err(error),
        };
        let size_bytes = file.metadata()?.len();
        Ok(Self {
            label: path.display().to_string(),
            backing: Box::new(file),
            size_bytes,
        })
    }

    /// Wraps an in-memory image.
    #[must_use]
    pub fn from_bytes(label: impl Into<String>, bytes: Vec<u8>) -> Self {
        let size_bytes = bytes.len() as u64;
        Self {
            label: label.into(),
            backing: Box::new(Cursor::new(bytes)),
            size_bytes,
        }
    }

    /// Human-readable source of the image.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whole sectors available, counting a trailing partial sector.
    #[must_use]
    pub const fn sector_count(&self) -> u64 {
        self.size_bytes.div_ceil(SECTOR_SIZE as u64)
    }

    fn read_sector(&mut self, sector: u64, buffer: &mut [u8; SECTOR_SIZE]) -> io::Result<()> {
        if sector >= self.sector_count() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "sector beyond end of image",
            ));
        }
        buffer.fill(0);
        self.backing
            .seek(SeekFrom::Start(sector * SECTOR_SIZE as u64))?;
        let mut filled = 0;
        while filled < SECTOR_SIZE {
            let read = self.backing.read(&mut buffer[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        Ok(())
    }

    fn write_sector(&mut self, sector: u64, buffer: &[u8; SECTOR_SIZE]) -> io::Result<()> {
        if sector >= self.sector_count() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "sector beyond end of image",
            ));
        }
        let start = sector * SECTOR_SIZE as u64;
        // The final sector may be partial; never grow the image past its size.
        let len = usize::try_from(self.size_bytes - start)
            .map_or(SECTOR_SIZE, |rest| rest.min(SECTOR_SIZE));
        self.backing.seek(SeekFrom::Start(start))?;
        self.backing.write_all(&buffer[..len])?;
        self.backing.flush()
    }
}

/// Ordered disk image table; indices follow registration order from 0.
#[derive(Debug, Default)]
pub struct DiskTable {
    images: Vec<DiskImage>,
}

impl DiskTable {
    /// Appends an image and returns its index.
    pub fn register(&mut self, image: DiskImage) -> usize {
        self.images.push(image);
        self.images.len() - 1
    }

    /// Opens each path in order and registers it.
    ///
    /// # Errors
    ///
    /// Returns the failing path together with its I/O error.
    pub fn open_all<P: AsRef<Path>>(paths: &[P]) -> Result<Self, (PathBuf, io::Error)> {
        let mut table = Self::default();
        for path in paths {
            let path = path.as_ref();
            let image = DiskImage::open(path).map_err(|error| (path.to_path_buf(), error))?;
            let index = table.register(image);
            tracing::info!(index, path = %path.display(), "registered disk image");
        }
        Ok(table)
    }

    /// Registered `(index, image)` pairs in index order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &DiskImage)> {
        self.images.iter().enumerate()
    }

    /// Number of registered images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Returns `true` when no image is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Bus-facing controller over a frozen [`DiskTable`].
#[derive(Debug)]
pub struct DiskController {
    table: DiskTable,
    buffer: Box<[u8; SECTOR_SIZE]>,
    dropped_files: u32,
}

impl Default for DiskController {
    fn default() -> Self {
        Self::new(DiskTable::default())
    }
}

impl DiskController {
    /// Takes ownership of the table; it cannot change afterwards.
    #[must_use]
    pub fn new(table: DiskTable) -> Self {
        Self {
            table,
            buffer: Box::new([0; SECTOR_SIZE]),
            dropped_files: 0,
        }
    }

    /// The disk image table.
    #[must_use]
    pub const fn table(&self) -> &DiskTable {
        &self.table
    }

    /// Records a host file drop. The table is frozen after startup, so the
    /// drop is only counted and surfaced to the guest.
    pub fn note_dropped_file(&mut self, path: &Path) {
        self.dropped_files = self.dropped_files.saturating_add(1);
        tracing::info!(
            path = %path.display(),
            "file dropped on window; disk table is fixed for this session"
        );
    }

    /// Host file drops seen this session.
    #[must_use]
    pub const fn dropped_files(&self) -> u32 {
        self.dropped_files
    }

    fn image_mut(&mut self, id: u32) -> Option<&mut DiskImage> {
        self.table.images.get_mut(id as usize)
    }
}

impl Peripheral for DiskController {
    fn ports(&self) -> RangeInclusive<u32> {
        DISK_BASE..=DISK_END
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read(&mut self, offset: u32) -> Result<u32, BusError> {
        let (register, index) = (offset / REGISTER_SPAN * REGISTER_SPAN, offset % REGISTER_SPAN);
        match register {
            SIZE_QUERY => Ok(self
                .image_mut(index)
                .map_or(0, |image| image.sector_count().min(u64::from(u32::MAX)) as u32)),
            DROP_COUNT => Ok(self.dropped_files),
            BUFFER_WORDS if index < WORDS_PER_SECTOR => {
                let start = index as usize * 4;
                let mut word = [0; 4];
                word.copy_from_slice(&self.buffer[start..start + 4]);
                Ok(u32::from_le_bytes(word))
            }
            _ => Ok(0),
        }
    }

    fn write(&mut self, offset: u32, value: u32) -> Result<(), BusError> {
        let (register, index) = (offset / REGISTER_SPAN * REGISTER_SPAN, offset % REGISTER_SPAN);
        let port = DISK_BASE + offset;
        let failed = |reason: String| BusError::WriteFailed {
            port,
            value,
            reason,
        };
        match register {
            READ_SECTOR | WRITE_SECTOR => {
                let mut buffer = *self.buffer;
                let image = self
                    .image_mut(index)
                    .ok_or_else(|| failed(format!("no disk at index {index}")))?;
                let result = if register == READ_SECTOR {
                    image.read_sector(u64::from(value), &mut buffer)
                } else {
                    image.write_sector(u64::from(value), &buffer)
                };
                result.map_err(|error| failed(error.to_string()))?;
                *self.buffer = buffer;
                Ok(())
            }
            BUFFER_WORDS if index < WORDS_PER_SECTOR => {
                let start = index as usize * 4;
                self.buffer[start..start + 4].copy_from_slice(&value.to_le_bytes());
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{
        DiskController, DiskImage, DiskTable, BUFFER_WORDS, READ_SECTOR, SECTOR_SIZE, SIZE_QUERY,
        WRITE_SECTOR,
    };
    use crate::bus::{BusError, Peripheral};

    fn controller_with(bytes: Vec<u8>) -> DiskController {
        let mut table = DiskTable::default();
        table.register(DiskImage::from_bytes("mem", bytes));
        DiskController::new(table)
    }

    #[test]
    fn indices_follow_registration_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.img");
        let b = dir.path().join("b.img");
        std::fs::write(&a, vec![0; SECTOR_SIZE]).expect("write a");
        std::fs::write(&b, vec![0; SECTOR_SIZE * 3]).expect("write b");

        let table = DiskTable::open_all(&[&a, &b]).expect("both images open");
        let entries: Vec<_> = table
            .entries()
            .map(|(index, image)| (index, image.label().to_string(), image.sector_count()))
            .collect();

        assert_eq!(
            entries,
            vec![
                (0, a.display().to_string(), 1),
                (1, b.display().to_string(), 3)
            ]
        );
    }

    #[test]
    fn missing_image_reports_its_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.img");
        let (path, _) = DiskTable::open_all(&[&missing]).expect_err("missing file fails");
        assert_eq!(path, missing);
    }

    #[test]
    fn size_query_counts_partial_sector() {
        let mut controller = controller_with(vec![0; SECTOR_SIZE + 1]);
        assert_eq!(controller.read(SIZE_QUERY), Ok(2));
        assert_eq!(controller.read(SIZE_QUERY + 1), Ok(0));
    }

    #[test]
    fn sector_roundtrip_through_buffer() {
        let mut image = vec![0; SECTOR_SIZE * 2];
        image[SECTOR_SIZE..SECTOR_SIZE + 4].copy_from_slice(&[1, 2, 3, 4]);
        let mut controller = controller_with(image);

        controller.write(READ_SECTOR, 1).expect("read sector 1");
        assert_eq!(controller.read(BUFFER_WORDS), Ok(0x0403_0201));

        controller.write(BUFFER_WORDS + 1, 0xAABB_CCDD).expect("fill");
        controller.write(WRITE_SECTOR, 0).expect("write sector 0");
        controller.write(READ_SECTOR, 1).expect("read sector 1");
        controller.write(READ_SECTOR, 0).expect("read sector 0");
        assert_eq!(controller.read(BUFFER_WORDS + 1), Ok(0xAABB_CCDD));
    }

    #[test]
    fn out_of_range_sector_is_a_bus_error() {
        let mut controller = controller_with(vec![0; SECTOR_SIZE]);
        let error = controller
            .write(READ_SECTOR, 5)
            .expect_err("sector 5 does not exist");
        assert!(matches!(error, BusError::WriteFailed { value: 5, .. }));

        let error = controller
            .write(READ_SECTOR + 3, 0)
            .expect_err("disk 3 is absent");
        assert!(matches!(error, BusError::WriteFailed { .. }));
    }

    #[test]
    fn file_backed_writes_persist() {
        let mut file = tempfile::NamedTempFile::new().expect("temp image");
        file.write_all(&[0; SECTOR_SIZE]).expect("size image");
        let mut table = DiskTable::default();
        table.register(DiskImage::open(file.path()).expect("open image"));
        let mut controller = DiskController::new(table);

        controller.write(BUFFER_WORDS, 0x1122_3344).expect("fill");
        controller.write(WRITE_SECTOR, 0).expect("flush");

        let bytes = std::fs::read(file.path()).expect("read back");
        assert_eq!(&bytes[..4], &[0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn partial_last_sector_write_keeps_the_image_size() {
        let mut file = tempfile::NamedTempFile::new().expect("temp image");
        file.write_all(&[0; SECTOR_SIZE + 10]).expect("size image");
        let mut table = DiskTable::default();
        table.register(DiskImage::open(file.path()).expect("open image"));
        let mut controller = DiskController::new(table);

        for word in 0..128 {
            controller.write(BUFFER_WORDS + word, 0xFFFF_FFFF).expect("fill");
        }
        controller.write(WRITE_SECTOR, 1).expect("store last sector");

        let bytes = std::fs::read(file.path()).expect("read back");
        assert_eq!(bytes.len(), SECTOR_SIZE + 10);
        assert!(bytes[SECTOR_SIZE..].iter().all(|&byte| byte == 0xFF));
        assert_eq!(controller.read(SIZE_QUERY), Ok(2));
    }

    #[test]
    fn file_drops_are_counted_without_touching_the_table() {
        let mut controller = DiskController::default();
        controller.note_dropped_file(std::path::Path::new("/tmp/new.img"));
        assert_eq!(controller.dropped_files(), 1);
        assert!(controller.table().is_empty());
        assert_eq!(controller.read(super::DROP_COUNT), Ok(1));
    }
}
