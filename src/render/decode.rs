//! Decoding collaborator: pixels, content hash and modification time of a file

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use image::{DynamicImage, ImageDecoder, ImageReader};

use super::color::ColorSpace;
use super::transform::{DisplayImage, Size};

/// Result of a successful decode
#[derive(Clone, Debug)]
pub struct DecodedImage {
    pub pixels: DisplayImage,
    /// Color space named by an embedded ICC profile, if recognized
    pub embedded: Option<ColorSpace>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot decode {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{} has no pixels", .0.display())]
    Empty(PathBuf),
}

/// Where the viewer gets pixels and identities from
pub trait ImageSource: Send {
    fn decode(&self, path: &Path) -> Result<DecodedImage, DecodeError>;

    /// Stable across renames; used as the persistence key
    fn content_hash(&self, path: &Path) -> Result<String, DecodeError>;

    fn modified(&self, path: &Path) -> Option<SystemTime>;
}

/// Reads images from the filesystem with the `image` crate
#[derive(Clone, Copy, Debug, Default)]
pub struct FileDecoder;

impl ImageSource for FileDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedImage, DecodeError> {
        let io_err = |source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        };
        let image_err = |source| DecodeError::Image {
            path: path.to_path_buf(),
            source,
        };

        let reader = ImageReader::open(path)
            .map_err(io_err)?
            .with_guessed_format()
            .map_err(io_err)?;
        let mut decoder = reader.into_decoder().map_err(image_err)?;
        let embedded = match decoder.icc_profile() {
            Ok(Some(profile)) => identify_profile(&profile),
            Ok(None) => None,
            Err(e) => {
                log::debug!("Ignoring unreadable ICC profile in {}: {e}", path.display());
                None
            }
        };
        let pixels = DynamicImage::from_decoder(decoder)
            .map_err(image_err)?
            .to_rgb8();

        if Size::of(&pixels).is_empty() {
            return Err(DecodeError::Empty(path.to_path_buf()));
        }
        Ok(DecodedImage { pixels, embedded })
    }

    fn content_hash(&self, path: &Path) -> Result<String, DecodeError> {
        let io_err = |source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(io_err)?;
        let mut context = md5::Context::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).map_err(io_err)?;
            if n == 0 {
                break;
            }
            context.consume(&buf[..n]);
        }
        Ok(URL_SAFE_NO_PAD.encode(context.compute().0))
    }

    fn modified(&self, path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }
}

fn contains_text(haystack: &[u8], needle: &str) -> bool {
    let ascii = needle.as_bytes();
    let utf16: Vec<u8> = needle.encode_utf16().flat_map(u16::to_be_bytes).collect();
    haystack.windows(ascii.len()).any(|w| w == ascii)
        || haystack.windows(utf16.len()).any(|w| w == utf16.as_slice())
}

/// Match an ICC profile against the named spaces by its description text.
#[must_use]
pub fn identify_profile(profile: &[u8]) -> Option<ColorSpace> {
    const NAMES: [(&str, ColorSpace); 5] = [
        ("ProPhoto", ColorSpace::ProPhotoRgb),
        ("Adobe RGB", ColorSpace::AdobeRgb),
        ("Display P3", ColorSpace::DisplayP3),
        ("sRGB linear", ColorSpace::SrgbLinear),
        ("sRGB", ColorSpace::Srgb),
    ];
    NAMES
        .iter()
        .find(|(name, _)| contains_text(profile, name))
        .map(|(_, space)| *space)
}

/// Weighted luminance of the image border in `0.0..=1.0`
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BorderAverages {
    /// Top and bottom rows, corners excluded
    pub horizontal: f64,
    /// Left and right columns
    pub vertical: f64,
}

impl BorderAverages {
    /// Images of two pixels or less in either direction have no border.
    #[must_use]
    pub fn measure(image: &DisplayImage) -> Self {
        let (w, h) = image.dimensions();
        if w <= 2 || h <= 2 {
            return Self::default();
        }
        let weigh = |sum: [u64; 3], count: u32| {
            (sum[0] as f64 * 0.21 + sum[1] as f64 * 0.72 + sum[2] as f64 * 0.07)
                / f64::from(count)
                / 255.0
        };
        let add = |sum: &mut [u64; 3], px: &image::Rgb<u8>| {
            for c in 0..3 {
                sum[c] += u64::from(px[c]);
            }
        };

        let mut rows = [0u64; 3];
        for x in 1..w - 1 {
            add(&mut rows, image.get_pixel(x, 0));
            add(&mut rows, image.get_pixel(x, h - 1));
        }
        let mut columns = [0u64; 3];
        for y in 0..h {
            add(&mut columns, image.get_pixel(0, y));
            add(&mut columns, image.get_pixel(w - 1, y));
        }

        Self {
            horizontal: weigh(rows, 2 * (w - 2)),
            vertical: weigh(columns, 2 * h),
        }
    }

    /// The border that stays visible around `image` inside `view`: the side
    /// columns when the image is relatively taller, else the top and bottom rows.
    #[must_use]
    pub fn visible(&self, image: Size, view: Size) -> f64 {
        let taller = u64::from(image.height) * u64::from(view.width)
            > u64::from(image.width) * u64::from(view.height);
        if taller { self.vertical } else { self.horizontal }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn decodes_png_and_hashes_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.png");
        let image = DisplayImage::from_pixel(4, 3, Rgb([10, 20, 30]));
        image.save(&path).unwrap();

        let decoder = FileDecoder;
        let decoded = decoder.decode(&path).unwrap();
        assert_eq!(decoded.pixels, image);

        let hash = decoder.content_hash(&path).unwrap();
        assert_eq!(hash.len(), 22);
        assert!(!hash.contains('='));

        let copy = dir.path().join("renamed.png");
        std::fs::copy(&path, &copy).unwrap();
        assert_eq!(decoder.content_hash(&copy).unwrap(), hash);
        assert!(decoder.modified(&path).is_some());
    }

    #[test]
    fn hash_matches_md5_of_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bytes.bin");
        std::fs::write(&path, b"hello").unwrap();
        let expected = URL_SAFE_NO_PAD.encode(md5::compute(b"hello").0);
        assert_eq!(FileDecoder.content_hash(&path).unwrap(), expected);
    }

    #[test]
    fn missing_or_corrupt_files_fail() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.png");
        assert!(matches!(
            FileDecoder.decode(&missing),
            Err(DecodeError::Io { .. })
        ));

        let corrupt = dir.path().join("corrupt.png");
        std::fs::write(&corrupt, b"not an image").unwrap();
        assert!(FileDecoder.decode(&corrupt).is_err());
    }

    #[test]
    fn profile_descriptions_are_recognized() {
        assert_eq!(
            identify_profile(b"....desc....Adobe RGB (1998)...."),
            Some(ColorSpace::AdobeRgb)
        );
        let utf16: Vec<u8> = "Display P3"
            .encode_utf16()
            .flat_map(u16::to_be_bytes)
            .collect();
        assert_eq!(identify_profile(&utf16), Some(ColorSpace::DisplayP3));
        assert_eq!(identify_profile(b"unknown"), None);
    }

    #[test]
    fn border_average_weights() {
        let mut image = DisplayImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        for x in 0..4 {
            image.put_pixel(x, 0, Rgb([255, 255, 255]));
            image.put_pixel(x, 3, Rgb([255, 255, 255]));
        }
        let border = BorderAverages::measure(&image);
        assert!((border.horizontal - 1.0).abs() < 1e-9);
        assert!((border.vertical - 0.5).abs() < 1e-9);

        assert_eq!(border.visible(Size::new(4, 8), Size::new(100, 100)), border.vertical);
        assert_eq!(border.visible(Size::new(8, 4), Size::new(100, 100)), border.horizontal);
        assert_eq!(
            BorderAverages::measure(&DisplayImage::new(2, 5)),
            BorderAverages::default()
        );
    }
}
