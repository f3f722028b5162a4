//! Camera tuning parameters.
//!
//! Parameters start from the firmware defaults and can be overridden by a
//! tuning string of whitespace-separated `-key value` directives, e.g.
//! `-ss 20000 -ISO 400 -hf -awb cloud`.

use crate::firmware::{
    AwbMode, CameraComponent, CameraControl, DrcLevel, ExposureMode, ImageEffect, MeteringMode,
    RegionOfInterest, UnknownMode,
};
use thiserror::Error;

/// A tuning directive that could not be applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("unknown parameter '{0}'")]
    UnknownKey(String),
    #[error("parameter '{0}' needs a value")]
    MissingValue(&'static str),
    #[error("invalid value '{value}' for '{key}'")]
    InvalidValue { key: &'static str, value: String },
    #[error("value {value} for '{key}' outside {min}..={max}")]
    OutOfRange {
        key: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error(transparent)]
    UnknownMode(#[from] UnknownMode),
}

/// Structured camera parameter set.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraParameters {
    pub sharpness: i32,
    pub contrast: i32,
    pub brightness: u32,
    pub saturation: i32,
    pub iso: u32,
    pub video_stabilisation: bool,
    pub exposure_compensation: i32,
    pub exposure_mode: ExposureMode,
    pub metering_mode: MeteringMode,
    pub awb_mode: AwbMode,
    pub awb_gains: Option<(f32, f32)>,
    pub image_effect: ImageEffect,
    pub colour_effect: Option<(u8, u8)>,
    pub rotation: u32,
    pub hflip: bool,
    pub vflip: bool,
    pub roi: RegionOfInterest,
    /// Shutter speed in microseconds, 0 for automatic.
    pub shutter_speed: u32,
    pub drc: DrcLevel,
    pub stats_pass: bool,
}

impl Default for CameraParameters {
    fn default() -> Self {
        Self {
            sharpness: 0,
            contrast: 0,
            brightness: 50,
            saturation: 0,
            iso: 0,
            video_stabilisation: false,
            exposure_compensation: 0,
            exposure_mode: ExposureMode::Auto,
            metering_mode: MeteringMode::Average,
            awb_mode: AwbMode::Auto,
            awb_gains: None,
            image_effect: ImageEffect::None,
            colour_effect: None,
            rotation: 0,
            hflip: false,
            vflip: false,
            roi: RegionOfInterest::default(),
            shutter_speed: 0,
            drc: DrcLevel::Off,
            stats_pass: false,
        }
    }
}

/// Directive keys: (short, long, takes a value).
const DIRECTIVES: &[(&str, &str, bool)] = &[
    ("sh", "sharpness", true),
    ("co", "contrast", true),
    ("br", "brightness", true),
    ("sa", "saturation", true),
    ("ISO", "ISO", true),
    ("vs", "vstab", false),
    ("ev", "ev", true),
    ("ex", "exposure", true),
    ("awb", "awb", true),
    ("ifx", "imxfx", true),
    ("cfx", "colfx", true),
    ("mm", "metering", true),
    ("rot", "rotation", true),
    ("hf", "hflip", false),
    ("vf", "vflip", false),
    ("roi", "roi", true),
    ("ss", "shutter", true),
    ("awbg", "awbgains", true),
    ("drc", "drc", true),
    ("st", "stats", false),
];

impl CameraParameters {
    /// Defaults overridden by `directives`; bad directives are logged and skipped.
    pub fn from_directives(directives: &str) -> Self {
        let mut params = Self::default();
        for err in params.apply_directives(directives) {
            tracing::warn!(error = %err, "Ignoring camera parameter");
        }
        params
    }

    /// Applies a tuning string, returning the directives that were rejected.
    ///
    /// A key that takes no value consumes only itself, so the following token
    /// is read as the next key.
    pub fn apply_directives(&mut self, directives: &str) -> Vec<ParameterError> {
        let mut errors = Vec::new();
        let mut tokens = directives.split_whitespace().peekable();

        while let Some(token) = tokens.next() {
            let Some(&(short, _, takes_value)) = lookup(token) else {
                errors.push(ParameterError::UnknownKey(token.to_owned()));
                continue;
            };
            let value = if takes_value {
                match tokens.next_if(|next| lookup(next).is_none()) {
                    Some(value) => Some(value),
                    None => {
                        errors.push(ParameterError::MissingValue(short));
                        continue;
                    }
                }
            } else {
                None
            };
            if let Err(err) = self.set(short, value) {
                errors.push(err);
            }
        }
        errors
    }

    /// Sets one parameter by its short key.
    fn set(&mut self, key: &'static str, value: Option<&str>) -> Result<(), ParameterError> {
        let text = value.unwrap_or_default();
        match key {
            "sh" => self.sharpness = ranged(key, text, -100, 100)? as i32,
            "co" => self.contrast = ranged(key, text, -100, 100)? as i32,
            "br" => self.brightness = ranged(key, text, 0, 100)? as u32,
            "sa" => self.saturation = ranged(key, text, -100, 100)? as i32,
            "ISO" => self.iso = ranged(key, text, 0, 1600)? as u32,
            "vs" => self.video_stabilisation = true,
            "ev" => self.exposure_compensation = ranged(key, text, -10, 10)? as i32,
            "ex" => self.exposure_mode = text.parse()?,
            "awb" => self.awb_mode = text.parse()?,
            "ifx" => self.image_effect = text.parse()?,
            "cfx" => {
                let (u, v) = pair(key, text, ':')?;
                self.colour_effect = Some((
                    ranged(key, u, 0, 255)? as u8,
                    ranged(key, v, 0, 255)? as u8,
                ));
            }
            "mm" => self.metering_mode = text.parse()?,
            "rot" => {
                let degrees = ranged(key, text, i64::from(i32::MIN), i64::from(i32::MAX))?;
                // Only quarter turns are supported; round down to one.
                self.rotation = (degrees.rem_euclid(360) / 90 * 90) as u32;
            }
            "hf" => self.hflip = true,
            "vf" => self.vflip = true,
            "roi" => self.roi = parse_roi(key, text)?,
            "ss" => self.shutter_speed = ranged(key, text, 0, 6_000_000)? as u32,
            "awbg" => {
                let (red, blue) = pair(key, text, ',')?;
                self.awb_gains = Some((float(key, red)?, float(key, blue)?));
            }
            "drc" => self.drc = text.parse()?,
            "st" => self.stats_pass = true,
            _ => return Err(ParameterError::UnknownKey(key.to_owned())),
        }
        Ok(())
    }

    /// The full list of control writes that realise this parameter set.
    pub fn controls(&self) -> Vec<CameraControl> {
        let mut controls = vec![
            CameraControl::Saturation(self.saturation),
            CameraControl::Sharpness(self.sharpness),
            CameraControl::Contrast(self.contrast),
            CameraControl::Brightness(self.brightness),
            CameraControl::Iso(self.iso),
            CameraControl::VideoStabilisation(self.video_stabilisation),
            CameraControl::ExposureCompensation(self.exposure_compensation),
            CameraControl::ExposureMode(self.exposure_mode),
            CameraControl::MeteringMode(self.metering_mode),
            CameraControl::AwbMode(self.awb_mode),
            CameraControl::ImageEffect(self.image_effect),
            CameraControl::ColourEffect(self.colour_effect),
            CameraControl::Rotation(self.rotation),
            CameraControl::Flip {
                horizontal: self.hflip,
                vertical: self.vflip,
            },
            CameraControl::RegionOfInterest(self.roi),
            CameraControl::ShutterSpeed(self.shutter_speed),
            CameraControl::Drc(self.drc),
            CameraControl::StatsPass(self.stats_pass),
        ];
        if let Some((red, blue)) = self.awb_gains {
            controls.push(CameraControl::AwbGains { red, blue });
        }
        controls
    }

    /// Writes every parameter to the component, returning the failure count.
    pub fn apply(&self, component: &dyn CameraComponent) -> usize {
        let mut failures = 0;
        for control in self.controls() {
            if let Err(err) = component.set_control(&control) {
                tracing::warn!(control = control.name(), error = %err, "Camera control rejected");
                failures += 1;
            }
        }
        failures
    }
}

fn lookup(token: &str) -> Option<&'static (&'static str, &'static str, bool)> {
    let name = token
        .strip_prefix("--")
        .or_else(|| token.strip_prefix('-'))?;
    DIRECTIVES.iter().find(|(short, long, _)| {
        if token.starts_with("--") {
            name == *long
        } else {
            name == *short
        }
    })
}

fn ranged(key: &'static str, text: &str, min: i64, max: i64) -> Result<i64, ParameterError> {
    let value: i64 = text.parse().map_err(|_| ParameterError::InvalidValue {
        key,
        value: text.to_owned(),
    })?;
    if !(min..=max).contains(&value) {
        return Err(ParameterError::OutOfRange {
            key,
            value,
            min,
            max,
        });
    }
    Ok(value)
}

fn float(key: &'static str, text: &str) -> Result<f32, ParameterError> {
    text.parse().map_err(|_| ParameterError::InvalidValue {
        key,
        value: text.to_owned(),
    })
}

fn pair<'a>(key: &'static str, text: &'a str, sep: char) -> Result<(&'a str, &'a str), ParameterError> {
    text.split_once(sep).ok_or_else(|| ParameterError::InvalidValue {
        key,
        value: text.to_owned(),
    })
}

fn parse_roi(key: &'static str, text: &str) -> Result<RegionOfInterest, ParameterError> {
    let invalid = || ParameterError::InvalidValue {
        key,
        value: text.to_owned(),
    };
    let parts: Vec<f64> = text
        .split(',')
        .map(|part| part.parse::<f64>().map_err(|_| invalid()))
        .collect::<Result<_, _>>()?;
    let &[x, y, width, height] = parts.as_slice() else {
        return Err(invalid());
    };
    if [x, y, width, height].iter().any(|v| !(0.0..=1.0).contains(v)) {
        return Err(invalid());
    }
    Ok(RegionOfInterest {
        x,
        y,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = CameraParameters::default();
        assert_eq!(params.brightness, 50);
        assert_eq!(params.exposure_mode, ExposureMode::Auto);
        assert_eq!(params.shutter_speed, 0);
    }

    #[test]
    fn test_value_directives() {
        let mut params = CameraParameters::default();
        let errors = params.apply_directives("-ss 20000 -ISO 400 -ex night -awb cloud -ev -3");

        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(params.shutter_speed, 20_000);
        assert_eq!(params.iso, 400);
        assert_eq!(params.exposure_mode, ExposureMode::Night);
        assert_eq!(params.awb_mode, AwbMode::Cloud);
        assert_eq!(params.exposure_compensation, -3);
    }

    #[test]
    fn test_flag_consumes_only_itself() {
        let mut params = CameraParameters::default();
        let errors = params.apply_directives("-hf -br 70 -vf");

        assert!(errors.is_empty(), "{errors:?}");
        assert!(params.hflip);
        assert!(params.vflip);
        assert_eq!(params.brightness, 70);
    }

    #[test]
    fn test_long_form_keys() {
        let mut params = CameraParameters::default();
        let errors = params.apply_directives("--sharpness 25 --vstab --colfx 128:64");

        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(params.sharpness, 25);
        assert!(params.video_stabilisation);
        assert_eq!(params.colour_effect, Some((128, 64)));
    }

    #[test]
    fn test_bad_directives_are_skipped() {
        let mut params = CameraParameters::default();
        let errors = params.apply_directives("-zz 3 -br 400 -co 10 -ss");

        assert_eq!(
            errors,
            vec![
                ParameterError::UnknownKey("-zz".to_owned()),
                ParameterError::UnknownKey("3".to_owned()),
                ParameterError::OutOfRange {
                    key: "br",
                    value: 400,
                    min: 0,
                    max: 100
                },
                ParameterError::MissingValue("ss"),
            ]
        );
        assert_eq!(params.contrast, 10);
        assert_eq!(params.brightness, 50);
    }

    #[test]
    fn test_rotation_snaps_to_quarter_turns() {
        let mut params = CameraParameters::default();
        params.apply_directives("-rot 200");
        assert_eq!(params.rotation, 180);

        params.apply_directives("-rot -90");
        assert_eq!(params.rotation, 270);
    }

    #[test]
    fn test_roi_and_gains() {
        let mut params = CameraParameters::default();
        let errors = params.apply_directives("-roi 0.25,0.25,0.5,0.5 -awbg 1.5,1.2");

        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(params.roi.width, 0.5);
        assert_eq!(params.awb_gains, Some((1.5, 1.2)));
        assert!(params
            .controls()
            .contains(&CameraControl::AwbGains { red: 1.5, blue: 1.2 }));
    }
}
