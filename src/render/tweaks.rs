//! Per-image adjustment parameters and their textual encoding

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

/// White point that leaves every channel untouched
pub const NEUTRAL_WHITE: [u8; 3] = [255, 255, 255];

static LEGACY_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+),(-?\d+),(\d+),(\d+),(\d+)(?:,(-?\d+))?(?:,(-?\d+))?$")
        .expect("legacy tweak pattern is valid")
});

/// Clockwise rotation in quarter turns
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    #[default]
    None,
    Quarter,
    Half,
    ThreeQuarters,
}

impl Rotation {
    /// Normalize any angle to the nearest lower multiple of 90 in `0..360`.
    #[must_use]
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) / 90 {
            0 => Self::None,
            1 => Self::Quarter,
            2 => Self::Half,
            _ => Self::ThreeQuarters,
        }
    }

    #[must_use]
    pub const fn degrees(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Quarter => 90,
            Self::Half => 180,
            Self::ThreeQuarters => 270,
        }
    }

    #[must_use]
    pub fn clockwise(self) -> Self {
        Self::from_degrees(self.degrees() + 90)
    }

    #[must_use]
    pub fn counter_clockwise(self) -> Self {
        Self::from_degrees(self.degrees() - 90)
    }

    /// True when width and height trade places
    #[must_use]
    pub const fn swaps_axes(self) -> bool {
        matches!(self, Self::Quarter | Self::ThreeQuarters)
    }
}

/// Errors from decoding a stored tweak string
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TweakParseError {
    #[error("invalid value {value:?} for tweak key {key:?}")]
    InvalidValue { key: String, value: String },

    #[error("malformed legacy tweak string {0:?}")]
    Legacy(String),
}

/// User-editable correction parameters for one image
///
/// All values are non-destructive: the decoded source is never modified, the
/// renderer derives display buffers from it using these numbers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TweakSet {
    /// White point as a linear RGB triple; 255,255,255 is neutral
    pub white: [u8; 3],
    /// Index of a named color space, 0 selects the embedded or default one
    pub color_space_index: u8,
    pub black_level: u8,
    /// -100 to 100
    pub brightness: i32,
    /// -100 to 100, turned into an exponent by the renderer
    pub gamma: i32,
    /// -100 to 100
    pub saturation: i32,
    pub rotation: Rotation,
    pub mirrored: bool,
    unknown: Vec<String>,
}

impl Default for TweakSet {
    fn default() -> Self {
        Self {
            white: NEUTRAL_WHITE,
            color_space_index: 0,
            black_level: 0,
            brightness: 0,
            gamma: 0,
            saturation: 0,
            rotation: Rotation::None,
            mirrored: false,
            unknown: Vec::new(),
        }
    }
}

impl TweakSet {
    #[must_use]
    pub fn neutral() -> Self {
        Self::default()
    }

    /// True if rendering needs per-pixel work in linear space
    #[must_use]
    pub fn affects_pixels(&self) -> bool {
        self.black_level != 0
            || self.brightness != 0
            || self.gamma != 0
            || self.saturation != 0
            || self.white != NEUTRAL_WHITE
    }

    /// True if nothing at all differs from the defaults
    #[must_use]
    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }

    /// Tokens this version does not understand, kept verbatim
    #[must_use]
    pub fn unknown_tokens(&self) -> &[String] {
        &self.unknown
    }

    pub fn set_brightness(&mut self, value: i32) {
        self.brightness = value.clamp(-100, 100);
    }

    pub fn set_gamma(&mut self, value: i32) {
        self.gamma = value.clamp(-100, 100);
    }

    pub fn set_saturation(&mut self, value: i32) {
        self.saturation = value.clamp(-100, 100);
    }

    /// Encode as `key:value;` tokens, omitting neutral values.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if self.black_level != 0 {
            out.push_str(&format!("bk:{};", self.black_level));
        }
        if self.gamma != 0 {
            out.push_str(&format!("g:{};", self.gamma));
        }
        if self.white != NEUTRAL_WHITE {
            let [r, g, b] = self.white;
            out.push_str(&format!("wb:{r},{g},{b};"));
        }
        if self.saturation != 0 {
            out.push_str(&format!("s:{};", self.saturation));
        }
        if self.brightness != 0 {
            out.push_str(&format!("br:{};", self.brightness));
        }
        if self.rotation != Rotation::None {
            out.push_str(&format!("rot:{};", self.rotation.degrees()));
        }
        if self.mirrored {
            out.push_str("mir;");
        }
        if self.color_space_index != 0 {
            out.push_str(&format!("cs:{};", self.color_space_index));
        }
        for token in &self.unknown {
            out.push_str(token);
            out.push(';');
        }
        out
    }

    /// Decode either the tokenized form or the old positional comma form.
    pub fn decode(s: &str) -> Result<Self, TweakParseError> {
        let s = s.trim();
        if !s.contains(':') && s.contains(',') {
            return Self::decode_legacy(s);
        }

        let mut tweaks = Self::default();
        for token in s.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = match token.split_once(':') {
                Some((k, v)) => (k, Some(v)),
                None => (token, None),
            };
            match (key, value) {
                ("bk", Some(v)) => tweaks.black_level = parse_clamped(key, v, 0, 255)? as u8,
                ("g", Some(v)) => tweaks.gamma = parse_clamped(key, v, -100, 100)?,
                ("s", Some(v)) => tweaks.saturation = parse_clamped(key, v, -100, 100)?,
                ("br", Some(v)) => tweaks.brightness = parse_clamped(key, v, -100, 100)?,
                ("rot", Some(v)) => {
                    tweaks.rotation = Rotation::from_degrees(parse_int(key, v)?);
                }
                ("cs", Some(v)) => {
                    tweaks.color_space_index = parse_clamped(key, v, 0, 255)? as u8;
                }
                ("wb", Some(v)) => tweaks.white = parse_white(v)?,
                ("mir", None) => tweaks.mirrored = true,
                ("mir", Some(v)) => tweaks.mirrored = v.trim() != "0",
                _ => tweaks.unknown.push(token.to_string()),
            }
        }
        Ok(tweaks)
    }

    /// `black,gamma,r,g,b[,rotation[,color_space]]`
    fn decode_legacy(s: &str) -> Result<Self, TweakParseError> {
        let caps = LEGACY_FORM
            .captures(s)
            .ok_or_else(|| TweakParseError::Legacy(s.to_string()))?;
        let field = |i: usize| -> Result<Option<i32>, TweakParseError> {
            caps.get(i)
                .map(|m| {
                    m.as_str()
                        .parse::<i32>()
                        .map_err(|_| TweakParseError::Legacy(s.to_string()))
                })
                .transpose()
        };
        let channel = |i: usize| -> Result<u8, TweakParseError> {
            Ok(field(i)?.unwrap_or(255).clamp(0, 255) as u8)
        };

        let mut tweaks = Self::default();
        tweaks.black_level = field(1)?.unwrap_or(0).clamp(0, 255) as u8;
        tweaks.gamma = field(2)?.unwrap_or(0).clamp(-100, 100);
        tweaks.white = [channel(3)?, channel(4)?, channel(5)?];
        if let Some(rot) = field(6)? {
            tweaks.rotation = Rotation::from_degrees(rot);
        }
        if let Some(cs) = field(7)? {
            tweaks.color_space_index = cs.clamp(0, 255) as u8;
        }
        Ok(tweaks)
    }
}

fn parse_int(key: &str, value: &str) -> Result<i32, TweakParseError> {
    value
        .trim()
        .parse::<i32>()
        .map_err(|_| TweakParseError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

fn parse_clamped(key: &str, value: &str, lo: i32, hi: i32) -> Result<i32, TweakParseError> {
    Ok(parse_int(key, value)?.clamp(lo, hi))
}

fn parse_white(value: &str) -> Result<[u8; 3], TweakParseError> {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != 3 {
        return Err(TweakParseError::InvalidValue {
            key: "wb".to_string(),
            value: value.to_string(),
        });
    }
    let mut white = [0u8; 3];
    for (slot, part) in white.iter_mut().zip(parts) {
        *slot = parse_clamped("wb", part, 0, 255)? as u8;
    }
    Ok(white)
}

impl fmt::Display for TweakSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for TweakSet {
    type Err = TweakParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Which fields a paste copies from the clipboard tweak set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PasteMask {
    pub black_level: bool,
    pub gamma: bool,
    pub white: bool,
    pub brightness: bool,
    pub saturation: bool,
    pub color_space: bool,
}

impl Default for PasteMask {
    fn default() -> Self {
        Self {
            black_level: true,
            gamma: true,
            white: true,
            brightness: true,
            saturation: true,
            color_space: false,
        }
    }
}

impl PasteMask {
    /// Copy the selected fields of `from` into `to`. Returns whether anything changed.
    pub fn apply(&self, from: &TweakSet, to: &mut TweakSet) -> bool {
        let before = to.clone();
        if self.black_level {
            to.black_level = from.black_level;
        }
        if self.gamma {
            to.gamma = from.gamma;
        }
        if self.white {
            to.white = from.white;
        }
        if self.brightness {
            to.brightness = from.brightness;
        }
        if self.saturation {
            to.saturation = from.saturation;
        }
        if self.color_space {
            to.color_space_index = from.color_space_index;
        }
        *to != before
    }
}
