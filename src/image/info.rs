//! Image info block carried inside every firmware image.
//!
//! Lives at [`IMAGE_META_OFFSET`], just past the vector table:
//! ```text
//! [ii_sig:4][image_start:4][image_length:4][vector_chk:4][image_chk:4][ver_id:4]
//! ```
//! `image_chk` is the 32-bit sum of every image byte, taken with the
//! `image_chk` field itself zeroed.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use super::ImageVersion;
use crate::checksum::byte_sum32;
use crate::config::{IMAGE_INFO_SIG, IMAGE_META_OFFSET, IMAGE_SIZE};
use crate::error::ImageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub image_start: u32,
    pub image_length: u32,
    pub vector_chk: u32,
    pub image_chk: u32,
    pub version: ImageVersion,
}

impl ImageInfo {
    pub const SIZE: usize = 24;
    const CHK_OFF: usize = IMAGE_META_OFFSET + 16;

    pub fn read_from(image: &[u8]) -> Result<Self, ImageError> {
        let b = image
            .get(IMAGE_META_OFFSET..IMAGE_META_OFFSET + Self::SIZE)
            .ok_or(ImageError::BadImageInfo)?;
        if LittleEndian::read_u32(&b[0..4]) != IMAGE_INFO_SIG {
            return Err(ImageError::BadImageInfo);
        }
        let info = Self {
            image_start: LittleEndian::read_u32(&b[4..8]),
            image_length: LittleEndian::read_u32(&b[8..12]),
            vector_chk: LittleEndian::read_u32(&b[12..16]),
            image_chk: LittleEndian::read_u32(&b[16..20]),
            version: ImageVersion::read_from(&b[20..24]),
        };
        let len = info.image_length as usize;
        if len < IMAGE_META_OFFSET + Self::SIZE || len > IMAGE_SIZE {
            return Err(ImageError::BadImageInfo);
        }
        Ok(info)
    }

    fn write_to(&self, image: &mut [u8]) {
        let b = &mut image[IMAGE_META_OFFSET..IMAGE_META_OFFSET + Self::SIZE];
        LittleEndian::write_u32(&mut b[0..4], IMAGE_INFO_SIG);
        LittleEndian::write_u32(&mut b[4..8], self.image_start);
        LittleEndian::write_u32(&mut b[8..12], self.image_length);
        LittleEndian::write_u32(&mut b[12..16], self.vector_chk);
        LittleEndian::write_u32(&mut b[16..20], self.image_chk);
        b[20..24].copy_from_slice(&self.version.to_bytes());
    }

    /// Byte sum of `image` with the `image_chk` field read as zero.
    pub fn compute_checksum(image: &[u8]) -> u32 {
        let field = image
            .get(Self::CHK_OFF..Self::CHK_OFF + 4)
            .map(byte_sum32)
            .unwrap_or(0);
        byte_sum32(image).wrapping_sub(field)
    }

    /// Check `image` (possibly zero padded past `image_length`) against
    /// its own info block.
    pub fn verify(image: &[u8]) -> Result<Self, ImageError> {
        let info = Self::read_from(image)?;
        let body = image
            .get(..info.image_length as usize)
            .ok_or(ImageError::BadImageInfo)?;
        let found = Self::compute_checksum(body);
        if found != info.image_chk {
            return Err(ImageError::ImageChecksum {
                expected: info.image_chk,
                found,
            });
        }
        Ok(info)
    }

    /// Fill in the info block of a freshly linked image so it passes
    /// [`ImageInfo::verify`].
    pub fn stamp(image: &mut [u8], version: ImageVersion, image_start: u32) -> Result<Self, ImageError> {
        if image.len() < IMAGE_META_OFFSET + Self::SIZE {
            return Err(ImageError::BadImageInfo);
        }
        if image.len() > IMAGE_SIZE {
            return Err(ImageError::SlotOverflow);
        }
        let mut info = Self {
            image_start,
            image_length: image.len() as u32,
            vector_chk: byte_sum32(&image[..IMAGE_META_OFFSET]),
            image_chk: 0,
            version,
        };
        info.write_to(image);
        info.image_chk = Self::compute_checksum(image);
        info.write_to(image);
        Ok(info)
    }
}
