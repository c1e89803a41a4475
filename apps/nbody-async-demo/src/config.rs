//! Command line configuration.

use nbody_core::constants::DEFAULT_SLOT_COUNT;
use nbody_core::distribution::DEFAULT_SEED;
use tracing::warn;

const DEFAULT_FRAMES: u64 = 600;
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;

/// Demo settings, parsed from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoConfig {
    pub slots: usize,
    /// Frames to render before exiting; 0 runs until killed.
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub seed: u64,
    pub validation: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            slots: DEFAULT_SLOT_COUNT,
            frames: DEFAULT_FRAMES,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            seed: DEFAULT_SEED,
            validation: cfg!(debug_assertions),
        }
    }
}

impl DemoConfig {
    /// Parse arguments, program name excluded. Unknown flags and
    /// unparsable values are skipped with a warning.
    pub fn from_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--slots" => parse_value(&arg, args.next(), &mut config.slots),
                "--frames" => parse_value(&arg, args.next(), &mut config.frames),
                "--width" => parse_value(&arg, args.next(), &mut config.width),
                "--height" => parse_value(&arg, args.next(), &mut config.height),
                "--seed" => parse_value(&arg, args.next(), &mut config.seed),
                "--validation" => config.validation = true,
                "--no-validation" => config.validation = false,
                other => warn!("Ignoring unknown argument {other:?}"),
            }
        }

        config
    }
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>, target: &mut T) {
    let Some(raw) = value else {
        warn!("Missing value for {flag}");
        return;
    };
    match raw.parse() {
        Ok(v) => *target = v,
        Err(_) => warn!("Invalid value {raw:?} for {flag}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> DemoConfig {
        DemoConfig::from_args(args.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn defaults_without_arguments() {
        assert_eq!(parse(&[]), DemoConfig::default());
    }

    #[test]
    fn parses_all_flags() {
        let config = parse(&[
            "--slots", "4", "--frames", "10", "--width", "640", "--height", "480", "--seed",
            "7", "--no-validation",
        ]);
        assert_eq!(config.slots, 4);
        assert_eq!(config.frames, 10);
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.seed, 7);
        assert!(!config.validation);

        assert!(parse(&["--validation"]).validation);
    }

    #[test]
    fn bad_values_keep_defaults() {
        let config = parse(&["--slots", "many", "--frames"]);
        assert_eq!(config.slots, DEFAULT_SLOT_COUNT);
        assert_eq!(config.frames, DEFAULT_FRAMES);
    }
}
