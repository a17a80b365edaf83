//! Sentinel ("fill") value policy for the SoS archive.
//!
//! Every variable written to the archive is sized to the master topology, so
//! positions with no upstream result must carry a well-known placeholder
//! rather than whatever the allocator left behind. The placeholder differs by
//! data kind: 64-bit floats, 32-bit flags, 64-bit counters and strings each
//! have their own sentinel, and the same constants double as the `_FillValue`
//! attribute on the variables they fill.
//!
//! Source files use their own missing-data conventions (`_FillValue`,
//! `missing_value`, NaN). [`FillPolicy`] is the single point where those are
//! translated into the archive's sentinels.

/// Sentinel for 64-bit float data in the archive.
pub const FLOAT_FILL: f64 = -999999999999.0;

/// Sentinel for 32-bit integer data (flags, counters).
pub const INT_FILL: i32 = -999;

/// Sentinel for 64-bit integer data (identifiers, epoch seconds).
pub const LONG_FILL: i64 = -999999999999;

/// Sentinel for string-typed data.
pub const STRING_FILL: &str = "x";

/// Sentinel policy shared by all readers and the archive writer.
///
/// Carries the per-kind sentinel constants and the conversion from a source
/// file's missing convention to the archive's. A single policy value is
/// constructed per run and passed by reference; the constants are not
/// configurable at runtime, the struct exists so the policy travels through
/// the reader/writer seams as one typed object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillPolicy {
    float64: f64,
    int32: i32,
    int64: i64,
    string: &'static str,
}

impl Default for FillPolicy {
    fn default() -> Self {
        Self {
            float64: FLOAT_FILL,
            int32: INT_FILL,
            int64: LONG_FILL,
            string: STRING_FILL,
        }
    }
}

impl FillPolicy {
    /// Sentinel for f64 data.
    pub fn float64(&self) -> f64 {
        self.float64
    }

    /// Sentinel for i32 data.
    pub fn int32(&self) -> i32 {
        self.int32
    }

    /// Sentinel for i64 data.
    pub fn int64(&self) -> i64 {
        self.int64
    }

    /// Sentinel for string data.
    pub fn string(&self) -> &'static str {
        self.string
    }

    /// True when `value` is the archive's f64 sentinel.
    pub fn is_float_fill(&self, value: f64) -> bool {
        value == self.float64
    }

    /// Convert one f64 value from a source file to the archive convention.
    ///
    /// `source_fill` is the source variable's own missing marker when it
    /// declares one. NaN is always treated as missing.
    pub fn normalize_f64(&self, value: f64, source_fill: Option<f64>) -> f64 {
        if value.is_nan() {
            return self.float64;
        }
        match source_fill {
            Some(fill) if value == fill => self.float64,
            _ => value,
        }
    }

    /// Convert one i32 value from a source file to the archive convention.
    pub fn normalize_i32(&self, value: i32, source_fill: Option<i32>) -> i32 {
        match source_fill {
            Some(fill) if value == fill => self.int32,
            _ => value,
        }
    }

    /// Convert one i64 value from a source file to the archive convention.
    pub fn normalize_i64(&self, value: i64, source_fill: Option<i64>) -> i64 {
        match source_fill {
            Some(fill) if value == fill => self.int64,
            _ => value,
        }
    }

    /// Normalize a whole f64 slice in place.
    pub fn normalize_f64_slice(&self, values: &mut [f64], source_fill: Option<f64>) {
        for v in values.iter_mut() {
            *v = self.normalize_f64(*v, source_fill);
        }
    }

    /// Normalize a whole i32 slice in place.
    pub fn normalize_i32_slice(&self, values: &mut [i32], source_fill: Option<i32>) {
        for v in values.iter_mut() {
            *v = self.normalize_i32(*v, source_fill);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sentinels() {
        let fill = FillPolicy::default();
        assert_eq!(fill.float64(), -999999999999.0);
        assert_eq!(fill.int32(), -999);
        assert_eq!(fill.int64(), -999999999999);
        assert_eq!(fill.string(), "x");
    }

    #[test]
    fn test_nan_becomes_float_fill() {
        let fill = FillPolicy::default();
        assert_eq!(fill.normalize_f64(f64::NAN, None), FLOAT_FILL);
    }

    #[test]
    fn test_source_fill_translated() {
        let fill = FillPolicy::default();
        // A source using 9.96921e36 as its marker maps onto the archive's.
        let src = 9.96920996838687e+36;
        assert_eq!(fill.normalize_f64(src, Some(src)), FLOAT_FILL);
        assert_eq!(fill.normalize_f64(1.5, Some(src)), 1.5);
    }

    #[test]
    fn test_valid_values_untouched() {
        let fill = FillPolicy::default();
        assert_eq!(fill.normalize_f64(42.25, None), 42.25);
        assert_eq!(fill.normalize_i32(7, Some(-9999)), 7);
        assert_eq!(fill.normalize_i32(-9999, Some(-9999)), INT_FILL);
        assert_eq!(fill.normalize_i64(-128, None), -128);
    }

    #[test]
    fn test_slice_normalization() {
        let fill = FillPolicy::default();
        let mut vals = vec![1.0, f64::NAN, -1.0e30, 3.0];
        fill.normalize_f64_slice(&mut vals, Some(-1.0e30));
        assert_eq!(vals, vec![1.0, FLOAT_FILL, FLOAT_FILL, 3.0]);
    }

    #[test]
    fn test_is_float_fill() {
        let fill = FillPolicy::default();
        assert!(fill.is_float_fill(FLOAT_FILL));
        assert!(!fill.is_float_fill(0.0));
    }
}
