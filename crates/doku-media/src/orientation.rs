//! EXIF orientation handling.

use std::io::Cursor;

use exif::{In, Reader, Tag};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// The eight EXIF orientations, named by the transform that makes the stored
/// pixels upright.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Normal,
    MirroredHorizontal,
    Rotated180,
    MirroredVertical,
    Transposed,
    Rotated90,
    Transversed,
    Rotated270,
}

impl Orientation {
    /// Read the orientation tag from an encoded image's EXIF block.
    ///
    /// Returns `None` when the container has no EXIF data or no orientation tag.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let exif = Reader::new()
            .read_from_container(&mut Cursor::new(bytes))
            .ok()?;
        let field = exif.get_field(Tag::Orientation, In::PRIMARY)?;
        field.value.get_uint(0).map(Self::from)
    }

    /// The raw EXIF tag value.
    pub fn tag_value(&self) -> u32 {
        match self {
            Self::Normal => 1,
            Self::MirroredHorizontal => 2,
            Self::Rotated180 => 3,
            Self::MirroredVertical => 4,
            Self::Transposed => 5,
            Self::Rotated90 => 6,
            Self::Transversed => 7,
            Self::Rotated270 => 8,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::Normal
    }

    /// Re-render `img` so it displays upright without the tag.
    #[must_use]
    pub fn apply(&self, img: DynamicImage) -> DynamicImage {
        match self {
            Self::Normal => img,
            Self::MirroredHorizontal => img.fliph(),
            Self::Rotated180 => img.rotate180(),
            Self::MirroredVertical => img.flipv(),
            Self::Transposed => img.rotate90().fliph(),
            Self::Rotated90 => img.rotate90(),
            Self::Transversed => img.rotate270().fliph(),
            Self::Rotated270 => img.rotate270(),
        }
    }
}

impl From<u32> for Orientation {
    fn from(value: u32) -> Self {
        match value {
            2 => Self::MirroredHorizontal,
            3 => Self::Rotated180,
            4 => Self::MirroredVertical,
            5 => Self::Transposed,
            6 => Self::Rotated90,
            7 => Self::Transversed,
            8 => Self::Rotated270,
            _ => Self::Normal,
        }
    }
}
