use crate::error::{PersistenceError, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tagstore::blockio::{BlockDevice, Sector};
use tagstore::config::SECTOR_SIZE;
use tagstore::error::IoError;
use tagstore::format::{format_device, FormatPlan};
use tagstore::locator::Locator;

/// `EROFS` on Linux and the BSDs.
const EROFS: i32 = 30;

/// An SD card image in a regular file, addressed by sector.
pub struct FileDisk {
    file: File,
    path: PathBuf,
    read_only: bool,
    num_blocks: u32,
}

impl FileDisk {
    /// Open read/write, dropping to read only when the file or its
    /// filesystem refuses writes.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let (file, read_only) = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => (f, false),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied || e.raw_os_error() == Some(EROFS) => {
                (File::open(path)?, true)
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_file(file, path, read_only)
    }

    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::from_file(File::open(path)?, path, true)
    }

    fn from_file(file: File, path: &Path, read_only: bool) -> Result<Self> {
        let len = file.metadata()?.len();
        if len % SECTOR_SIZE as u64 != 0 {
            return Err(PersistenceError::UnalignedImage(len));
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            read_only,
            num_blocks: (len / SECTOR_SIZE as u64) as u32,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn seek_to(&mut self, blk: u32) -> io::Result<()> {
        self.file
            .seek(SeekFrom::Start(blk as u64 * SECTOR_SIZE as u64))
            .map(|_| ())
    }
}

/// Fill `buf` as far as the file allows. Returns the byte count.
fn read_full(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        match file.read(&mut buf[done..]) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

impl BlockDevice for FileDisk {
    fn read_block(&mut self, blk: u32, buf: &mut Sector) -> std::result::Result<(), IoError> {
        if blk >= self.num_blocks {
            return Err(IoError::ReadTooShort);
        }
        self.seek_to(blk).map_err(|_| IoError::ReadFail)?;
        match read_full(&mut self.file, buf) {
            Ok(n) if n == SECTOR_SIZE => Ok(()),
            Ok(_) => Err(IoError::ReadTooShort),
            Err(_) => Err(IoError::ReadFail),
        }
    }

    fn write_block(&mut self, blk: u32, buf: &Sector) -> std::result::Result<(), IoError> {
        if self.read_only {
            return Err(IoError::ReadOnly);
        }
        if blk >= self.num_blocks {
            return Err(IoError::WriteTooShort);
        }
        self.seek_to(blk).map_err(|_| IoError::WriteFail)?;
        match self.file.write(buf) {
            Ok(n) if n == SECTOR_SIZE => Ok(()),
            Ok(_) => Err(IoError::WriteTooShort),
            Err(e) if e.raw_os_error() == Some(EROFS) => Err(IoError::ReadOnly),
            Err(_) => Err(IoError::WriteFail),
        }
    }

    fn num_blocks(&self) -> u32 {
        self.num_blocks
    }
}

/// Create a zeroed image of `num_blocks` sectors and format it.
pub fn create_image(path: impl AsRef<Path>, num_blocks: u32, plan: &FormatPlan) -> Result<Locator> {
    let file = File::create(path.as_ref())?;
    file.set_len(num_blocks as u64 * SECTOR_SIZE as u64)?;
    drop(file);

    let mut disk = FileDisk::open(path)?;
    // the file is fresh, no need to zero the data area again
    let plan = FormatPlan { erase_data: false, ..*plan };
    let loc = format_device(&mut disk, &plan)?;
    disk.sync()?;
    Ok(loc)
}
