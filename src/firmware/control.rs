//! Camera control values understood by the firmware's control port.

use std::fmt;
use std::str::FromStr;

/// Declares a firmware mode enum with its canonical lowercase names.
macro_rules! named_modes {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $(
                #[allow(missing_docs)]
                $variant,
            )+
        }

        impl $name {
            /// Canonical name, as used in tuning directives.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownMode;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(UnknownMode {
                        kind: stringify!($name),
                        value: s.to_owned(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// A mode name that is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownMode {
    /// Which mode family was being parsed.
    pub kind: &'static str,
    /// The rejected text.
    pub value: String,
}

named_modes! {
    /// Automatic exposure program.
    ExposureMode {
        Off => "off",
        Auto => "auto",
        Night => "night",
        NightPreview => "nightpreview",
        Backlight => "backlight",
        Spotlight => "spotlight",
        Sports => "sports",
        Snow => "snow",
        Beach => "beach",
        VeryLong => "verylong",
        FixedFps => "fixedfps",
        AntiShake => "antishake",
        Fireworks => "fireworks",
    }
}

named_modes! {
    /// Automatic white balance program.
    AwbMode {
        Off => "off",
        Auto => "auto",
        Sun => "sun",
        Cloud => "cloud",
        Shade => "shade",
        Tungsten => "tungsten",
        Fluorescent => "fluorescent",
        Incandescent => "incandescent",
        Flash => "flash",
        Horizon => "horizon",
        GreyWorld => "greyworld",
    }
}

named_modes! {
    /// Exposure metering area.
    MeteringMode {
        Average => "average",
        Spot => "spot",
        Backlit => "backlit",
        Matrix => "matrix",
    }
}

named_modes! {
    /// Firmware image effect.
    ImageEffect {
        None => "none",
        Negative => "negative",
        Solarise => "solarise",
        Sketch => "sketch",
        Denoise => "denoise",
        Emboss => "emboss",
        OilPaint => "oilpaint",
        Hatch => "hatch",
        Gpen => "gpen",
        Pastel => "pastel",
        Watercolour => "watercolour",
        Film => "film",
        Blur => "blur",
        Saturation => "saturation",
        ColourSwap => "colourswap",
        WashedOut => "washedout",
        Posterise => "posterise",
        ColourPoint => "colourpoint",
        ColourBalance => "colourbalance",
        Cartoon => "cartoon",
    }
}

named_modes! {
    /// Dynamic range compression strength.
    DrcLevel {
        Off => "off",
        Low => "low",
        Medium => "med",
        High => "high",
    }
}

/// Normalised region of interest, every component in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionOfInterest {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for RegionOfInterest {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }
}

/// One parameter write on the camera control port.
#[derive(Debug, Clone, PartialEq)]
pub enum CameraControl {
    Sharpness(i32),
    Contrast(i32),
    Brightness(u32),
    Saturation(i32),
    Iso(u32),
    VideoStabilisation(bool),
    ExposureCompensation(i32),
    ExposureMode(ExposureMode),
    MeteringMode(MeteringMode),
    AwbMode(AwbMode),
    /// Red and blue gains used when AWB is off.
    AwbGains { red: f32, blue: f32 },
    ImageEffect(ImageEffect),
    /// Fixed chroma values; `None` disables the colour effect.
    ColourEffect(Option<(u8, u8)>),
    /// Sensor rotation in degrees, one of 0/90/180/270.
    Rotation(u32),
    Flip { horizontal: bool, vertical: bool },
    RegionOfInterest(RegionOfInterest),
    /// Shutter speed in microseconds, 0 for automatic.
    ShutterSpeed(u32),
    Drc(DrcLevel),
    StatsPass(bool),
}

impl CameraControl {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sharpness(_) => "sharpness",
            Self::Contrast(_) => "contrast",
            Self::Brightness(_) => "brightness",
            Self::Saturation(_) => "saturation",
            Self::Iso(_) => "iso",
            Self::VideoStabilisation(_) => "video-stabilisation",
            Self::ExposureCompensation(_) => "exposure-compensation",
            Self::ExposureMode(_) => "exposure-mode",
            Self::MeteringMode(_) => "metering-mode",
            Self::AwbMode(_) => "awb-mode",
            Self::AwbGains { .. } => "awb-gains",
            Self::ImageEffect(_) => "image-effect",
            Self::ColourEffect(_) => "colour-effect",
            Self::Rotation(_) => "rotation",
            Self::Flip { .. } => "flip",
            Self::RegionOfInterest(_) => "region-of-interest",
            Self::ShutterSpeed(_) => "shutter-speed",
            Self::Drc(_) => "drc",
            Self::StatsPass(_) => "stats-pass",
        }
    }
}
