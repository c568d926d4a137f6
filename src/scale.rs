//! Sequential color schemes and the continuous scale used for choropleth fills.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, Copy)]
struct ColorStop {
    t: f64,
    color: Rgb,
}

const fn stop(t: f64, r: u8, g: u8, b: u8) -> ColorStop {
    ColorStop {
        t,
        color: Rgb::new(r, g, b),
    }
}

/// Nine-class ColorBrewer sequential schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorScheme {
    /// Yellow -> Orange -> Red
    YlOrRd,
    /// Yellow -> Green
    YlGn,
}

impl ColorScheme {
    fn stops(&self) -> &'static [ColorStop] {
        match self {
            Self::YlOrRd => YL_OR_RD,
            Self::YlGn => YL_GN,
        }
    }
}

const YL_OR_RD: &[ColorStop] = &[
    stop(0.000, 255, 255, 204),
    stop(0.125, 255, 237, 160),
    stop(0.250, 254, 217, 118),
    stop(0.375, 254, 178, 76),
    stop(0.500, 253, 141, 60),
    stop(0.625, 252, 78, 42),
    stop(0.750, 227, 26, 28),
    stop(0.875, 189, 0, 38),
    stop(1.000, 128, 0, 38),
];

const YL_GN: &[ColorStop] = &[
    stop(0.000, 255, 255, 229),
    stop(0.125, 247, 252, 185),
    stop(0.250, 217, 240, 163),
    stop(0.375, 173, 221, 142),
    stop(0.500, 120, 198, 121),
    stop(0.625, 65, 171, 93),
    stop(0.750, 35, 132, 67),
    stop(0.875, 0, 104, 55),
    stop(1.000, 0, 69, 41),
];

fn lerp(a: u8, b: u8, t: f64) -> u8 {
    (a as f64 + (b as f64 - a as f64) * t).round() as u8
}

fn multi_stop(stops: &[ColorStop], t: f64) -> Rgb {
    if t.is_nan() || t <= 0.0 {
        return stops[0].color;
    }
    if t >= 1.0 {
        return stops[stops.len() - 1].color;
    }
    for i in 1..stops.len() {
        if t <= stops[i].t {
            let (a, b) = (stops[i - 1], stops[i]);
            let ratio = (t - a.t) / (b.t - a.t);
            return Rgb::new(
                lerp(a.color.r, b.color.r, ratio),
                lerp(a.color.g, b.color.g, ratio),
                lerp(a.color.b, b.color.b, ratio),
            );
        }
    }
    stops[stops.len() - 1].color
}

/// Continuous mapping from the observed `[min, max]` domain to a scheme.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorScale {
    pub scheme: ColorScheme,
    pub min: f64,
    pub max: f64,
}

impl ColorScale {
    pub fn new(scheme: ColorScheme, min: f64, max: f64) -> Self {
        Self { scheme, min, max }
    }

    /// Builds a scale spanning the finite values, or `None` when there are none.
    pub fn from_values<I>(scheme: ColorScheme, values: I) -> Option<Self>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values.into_iter().filter(|v| v.is_finite()) {
            min = min.min(v);
            max = max.max(v);
        }
        (min <= max).then(|| Self::new(scheme, min, max))
    }

    /// True when the domain has zero width.
    pub fn is_degenerate(&self) -> bool {
        self.min >= self.max
    }

    /// Position of `value` in the domain, clamped to `[0, 1]`.
    pub fn normalize(&self, value: f64) -> f64 {
        if self.is_degenerate() {
            return 0.0;
        }
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    pub fn color(&self, value: f64) -> Rgb {
        multi_stop(self.scheme.stops(), self.normalize(value))
    }

    /// `n` evenly spaced colors from the low to the high end, for legends.
    pub fn legend_stops(&self, n: usize) -> Vec<String> {
        match n {
            0 => Vec::new(),
            1 => vec![multi_stop(self.scheme.stops(), 0.0).to_hex()],
            _ => (0..n)
                .map(|i| multi_stop(self.scheme.stops(), i as f64 / (n - 1) as f64).to_hex())
                .collect(),
        }
    }
}
