use serde::Serialize;
use std::fmt;

/// HSL color descriptor handed to the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HslColor {
    /// 0..360
    pub hue: u16,
    /// Percent
    pub saturation: u8,
    /// Percent
    pub lightness: u8,
}

impl fmt::Display for HslColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hsl({}, {}%, {}%)", self.hue, self.saturation, self.lightness)
    }
}

/// Deterministic id -> color mapping
///
/// Accumulates `hash = c + ((hash << 5) - hash)` over the UTF-16 code units of
/// the id, with the shift performed on the 32-bit truncation of `hash`, and
/// reduces the result modulo 360. The same id maps to the same hue in every
/// process, so colors stay stable between the live view and replays.
pub fn color_for(id: &str) -> HslColor {
    let mut hash: i64 = 0;
    for unit in id.encode_utf16() {
        let shifted = (hash as i32).wrapping_shl(5) as i64;
        hash = (unit as i64) + (shifted - hash);
    }

    HslColor {
        hue: (hash % 360).unsigned_abs() as u16,
        saturation: 100,
        lightness: 50,
    }
}
