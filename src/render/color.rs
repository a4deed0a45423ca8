//! Transfer functions, named color spaces and luminance weights

use std::sync::LazyLock;

/// Largest value of a linear-light channel
pub const FULL_SCALE: u16 = u16::MAX;

/// Luminance weights in 1/65536 units. They sum to exactly 65536.
pub const LUMA_R: u32 = 13933;
pub const LUMA_G: u32 = 46871;
pub const LUMA_B: u32 = 4732;
pub const LUMA_SHIFT: u32 = 16;

const SRGB_A: f64 = 0.055;

/// Weighted luminance of a linear pixel, same scale as the inputs.
#[inline]
#[must_use]
pub fn luminance(r: u32, g: u32, b: u32) -> u32 {
    (r * LUMA_R + g * LUMA_G + b * LUMA_B) >> LUMA_SHIFT
}

/// sRGB-encoded byte to linear light in `0.0..=1.0`
#[must_use]
pub fn srgb_to_linear(v: u8) -> f64 {
    let s = f64::from(v) / 255.0;
    if s < 0.04045 {
        s / 12.92
    } else {
        ((s + SRGB_A) / (1.0 + SRGB_A)).powf(2.4)
    }
}

/// Linear light in `0.0..=1.0` to an sRGB-encoded byte
#[must_use]
pub fn linear_to_srgb(v: f64) -> u8 {
    let v = v.clamp(0.0, 1.0);
    let s = if v < 0.003_130_8 {
        v * 12.92
    } else {
        (1.0 + SRGB_A) * v.powf(1.0 / 2.4) - SRGB_A
    };
    (s * 255.0).round().clamp(0.0, 255.0) as u8
}

/// How encoded values map to light
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TransferFunction {
    Srgb,
    Linear,
    Gamma(f64),
}

impl TransferFunction {
    #[must_use]
    pub fn to_linear(self, encoded: f64) -> f64 {
        match self {
            Self::Srgb => srgb_to_linear((encoded.clamp(0.0, 1.0) * 255.0).round() as u8),
            Self::Linear => encoded,
            Self::Gamma(g) => encoded.max(0.0).powf(g),
        }
    }

    /// Table from an 8-bit encoded channel to a 16-bit linear one
    #[must_use]
    pub fn decode_table(self) -> [u16; 256] {
        let mut table = [0u16; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            let linear = match self {
                Self::Srgb => srgb_to_linear(i as u8),
                other => other.to_linear(i as f64 / 255.0),
            };
            *slot = (linear * f64::from(FULL_SCALE)).round() as u16;
        }
        table
    }
}

/// Named spaces selectable per image. Index 0 means "use what the file says".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    Srgb,
    SrgbLinear,
    AdobeRgb,
    DisplayP3,
    ProPhotoRgb,
}

impl ColorSpace {
    pub const ALL: [ColorSpace; 5] = [
        Self::Srgb,
        Self::SrgbLinear,
        Self::AdobeRgb,
        Self::DisplayP3,
        Self::ProPhotoRgb,
    ];

    /// `None` for index 0 or an index this build does not know.
    #[must_use]
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            1 => Some(Self::Srgb),
            2 => Some(Self::SrgbLinear),
            3 => Some(Self::AdobeRgb),
            4 => Some(Self::DisplayP3),
            5 => Some(Self::ProPhotoRgb),
            _ => None,
        }
    }

    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Self::Srgb => 1,
            Self::SrgbLinear => 2,
            Self::AdobeRgb => 3,
            Self::DisplayP3 => 4,
            Self::ProPhotoRgb => 5,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Srgb => "sRGB",
            Self::SrgbLinear => "sRGB (linear)",
            Self::AdobeRgb => "Adobe RGB",
            Self::DisplayP3 => "Display P3",
            Self::ProPhotoRgb => "ProPhoto RGB",
        }
    }

    #[must_use]
    pub fn transfer(self) -> TransferFunction {
        match self {
            Self::Srgb | Self::DisplayP3 => TransferFunction::Srgb,
            Self::SrgbLinear => TransferFunction::Linear,
            Self::AdobeRgb => TransferFunction::Gamma(563.0 / 256.0),
            Self::ProPhotoRgb => TransferFunction::Gamma(1.8),
        }
    }

    /// The space a render decodes with: tweak override, then embedded, then sRGB.
    #[must_use]
    pub fn resolve(index: u8, embedded: Option<ColorSpace>) -> ColorSpace {
        Self::from_index(index)
            .or(embedded)
            .unwrap_or(Self::Srgb)
    }
}

static ENCODE_TABLE: LazyLock<Vec<u8>> = LazyLock::new(|| {
    (0..=u32::from(FULL_SCALE))
        .map(|v| linear_to_srgb(f64::from(v) / f64::from(FULL_SCALE)))
        .collect()
});

/// 16-bit linear channel to an sRGB byte
#[inline]
#[must_use]
pub fn encode_srgb(v: u16) -> u8 {
    ENCODE_TABLE[usize::from(v)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luminance_weights_sum_to_one() {
        assert_eq!(LUMA_R + LUMA_G + LUMA_B, 1 << LUMA_SHIFT);
        let full = u32::from(FULL_SCALE);
        assert_eq!(luminance(full, full, full), full);
    }

    #[test]
    fn srgb_round_trips_every_byte() {
        for v in 0..=255u8 {
            assert_eq!(linear_to_srgb(srgb_to_linear(v)), v, "byte {v}");
        }
    }

    #[test]
    fn decode_table_round_trips_through_encode() {
        let table = TransferFunction::Srgb.decode_table();
        assert_eq!(table[0], 0);
        assert_eq!(table[255], FULL_SCALE);
        for v in 0..=255u8 {
            assert_eq!(encode_srgb(table[usize::from(v)]), v);
        }
    }

    #[test]
    fn color_space_index_zero_falls_back() {
        assert_eq!(ColorSpace::resolve(0, None), ColorSpace::Srgb);
        assert_eq!(
            ColorSpace::resolve(0, Some(ColorSpace::AdobeRgb)),
            ColorSpace::AdobeRgb
        );
        assert_eq!(
            ColorSpace::resolve(5, Some(ColorSpace::AdobeRgb)),
            ColorSpace::ProPhotoRgb
        );
        for cs in ColorSpace::ALL {
            assert_eq!(ColorSpace::from_index(cs.index()), Some(cs));
        }
    }

    #[test]
    fn linear_space_keeps_values() {
        let table = TransferFunction::Linear.decode_table();
        assert_eq!(table[128], (128.0 / 255.0 * 65535.0_f64).round() as u16);
    }
}
