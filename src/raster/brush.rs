use crate::models::Point;

/// Largest normalised change a full-strength stroke applies at the centre
pub const MAX_ADJUSTMENT: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrushMode {
    #[default]
    Increase,
    Decrease,
}

/// Circular brush with linear falloff for correcting rank/confidence maps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrushSettings {
    pub mode: BrushMode,
    /// Diameter in pixels
    pub size: f64,
    strength: f64,
}

/// Outcome of a stroke. A buffer whose length is not `width * height` is
/// returned untouched as `Ignored` rather than treated as an error, so a
/// stale canvas state never breaks an editing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrushStroke {
    Applied(Vec<u8>),
    Ignored(Vec<u8>),
}

impl BrushStroke {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn into_inner(self) -> Vec<u8> {
        match self {
            Self::Applied(data) | Self::Ignored(data) => data,
        }
    }
}

impl BrushSettings {
    pub fn new(mode: BrushMode, size: f64, strength: f64) -> Self {
        Self {
            mode,
            size,
            strength: clamp_strength(strength),
        }
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    pub fn set_strength(&mut self, strength: f64) {
        self.strength = clamp_strength(strength);
    }

    pub fn radius(&self) -> f64 {
        self.size / 2.0
    }

    /// Apply one dab centred on `center` to a copy of `rank`.
    ///
    /// Every in-bounds pixel within the radius moves by
    /// `±strength · (1 − d/r) · 0.2` in normalised units, clamped to `[0, 1]`.
    pub fn apply_stroke(&self, rank: &[u8], width: u32, height: u32, center: Point) -> BrushStroke {
        let (width, height) = (width as usize, height as usize);
        if width.checked_mul(height) != Some(rank.len()) {
            return BrushStroke::Ignored(rank.to_vec());
        }

        let mut modified = rank.to_vec();
        let radius = self.radius();
        if width == 0 || height == 0 || !(radius > 0.0) || !center.x.is_finite() || !center.y.is_finite() {
            return BrushStroke::Applied(modified);
        }

        let sign = match self.mode {
            BrushMode::Increase => 1.0,
            BrushMode::Decrease => -1.0,
        };

        let x_start = (center.x - radius).floor().max(0.0) as usize;
        let y_start = (center.y - radius).floor().max(0.0) as usize;
        let x_end = ((center.x + radius).ceil().max(0.0) as usize).min(width - 1);
        let y_end = ((center.y + radius).ceil().max(0.0) as usize).min(height - 1);

        for y in y_start..=y_end {
            for x in x_start..=x_end {
                let dx = x as f64 - center.x;
                let dy = y as f64 - center.y;
                let distance = (dx * dx + dy * dy).sqrt();
                if distance > radius {
                    continue;
                }

                let falloff = 1.0 - distance / radius;
                let adjustment = sign * self.strength * falloff * MAX_ADJUSTMENT;

                let idx = y * width + x;
                let current = modified[idx] as f64 / 255.0;
                let updated = (current + adjustment).clamp(0.0, 1.0);
                modified[idx] = (updated * 255.0).round() as u8;
            }
        }

        BrushStroke::Applied(modified)
    }
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self::new(BrushMode::Increase, 20.0, 0.5)
    }
}

fn clamp_strength(strength: f64) -> f64 {
    if strength.is_nan() { 0.0 } else { strength.clamp(0.0, 1.0) }
}
