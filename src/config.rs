use anyhow::{bail, Context, Result};
use std::fs;

use crate::types::{Config, LineBreak, Point, ZoneMode};
use crate::zones::ZoneLayout;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.presets.contains_key(&self.preset) {
            bail!("unknown preset '{}'", self.preset);
        }
        // Building the layout runs the polygon checks for the active mode
        self.zone_layout()?;

        if self.capture.queue_capacity == 0 {
            bail!("capture.queue_capacity must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.capture.confidence_threshold) {
            bail!("capture.confidence_threshold must be within [0, 1]");
        }
        if self.capture.cooldown_secs < 0.0 {
            bail!("capture.cooldown_secs must not be negative");
        }
        if self.session.timeout_secs <= 0.0 {
            bail!("session.timeout_secs must be positive");
        }
        match self.reconstruct.line_break {
            LineBreak::Relative(f) if f <= 0.0 => {
                bail!("reconstruct.line_break relative factor must be positive")
            }
            LineBreak::AbsolutePx(px) if px <= 0.0 => {
                bail!("reconstruct.line_break pixel distance must be positive")
            }
            _ => {}
        }
        Ok(())
    }

    /// The zone layout for the active preset and mode.
    pub fn zone_layout(&self) -> Result<ZoneLayout> {
        let preset = self
            .presets
            .get(&self.preset)
            .with_context(|| format!("unknown preset '{}'", self.preset))?;

        match self.mode {
            ZoneMode::Single => Ok(ZoneLayout::single(polygon(&preset.single, "single")?)),
            ZoneMode::Dual => Ok(ZoneLayout::dual(
                polygon(&preset.entry, "entry")?,
                polygon(&preset.exit, "exit")?,
            )),
        }
    }
}

fn polygon(points: &Option<Vec<[i32; 2]>>, name: &str) -> Result<Vec<Point>> {
    let Some(points) = points else {
        bail!("active preset is missing zone '{name}'");
    };
    if points.len() < 3 {
        bail!("zone '{name}' needs at least 3 points, got {}", points.len());
    }
    Ok(points.iter().map(|[x, y]| Point::new(*x, *y)).collect())
}
