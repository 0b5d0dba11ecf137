use serde::Serialize;

/// Closed numeric interval parsed from a `min~max` cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RecordRange {
    pub min: f64,
    pub max: f64,
}

impl RecordRange {
    /// Reads the first two `~` segments; anything after a second `~` is ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut bounds = raw.split('~');
        let min = leading_number(bounds.next()?)?;
        let max = leading_number(bounds.next()?)?;
        Some(Self { min, max })
    }

    /// Both bounds inclusive.
    pub fn contains(&self, record: f64) -> bool {
        self.min <= record && record <= self.max
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.min <= other.max && other.min <= self.max
    }
}

/// Longest numeric prefix after leading whitespace, so `"8.5초"` reads as 8.5.
/// Text without a leading digit yields `None`, as do non-finite values.
pub fn leading_number(raw: &str) -> Option<f64> {
    let text = raw.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let int_digits = count_digits(&bytes[end..]);
    end += int_digits;

    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = count_digits(&bytes[end + 1..]);
        if int_digits > 0 || frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exponent = end + 1;
        if matches!(bytes.get(exponent), Some(b'+' | b'-')) {
            exponent += 1;
        }
        let exp_digits = count_digits(&bytes[exponent..]);
        if exp_digits > 0 {
            end = exponent + exp_digits;
        }
    }

    text[..end]
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|byte| byte.is_ascii_digit()).count()
}

/// Returns `false` for malformed range text rather than failing.
pub fn in_range(record: f64, raw: &str) -> bool {
    RecordRange::parse(raw).is_some_and(|range| range.contains(record))
}
