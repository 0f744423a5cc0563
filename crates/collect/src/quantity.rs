//! Kubernetes resource quantity parsing (`250m`, `1.5Gi`, `2e3`).

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

fn split_suffix(s: &str) -> (&str, &str) {
    let idx = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '+' || *c == '-'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s.split_at(idx)
}

enum Scale {
    Decimal(i32),
    Binary(i32),
}

fn scale(suffix: &str) -> Option<Scale> {
    let sc = match suffix {
        "" => Scale::Decimal(0),
        "n" => Scale::Decimal(-9),
        "u" => Scale::Decimal(-6),
        "m" => Scale::Decimal(-3),
        "k" => Scale::Decimal(3),
        "M" => Scale::Decimal(6),
        "G" => Scale::Decimal(9),
        "T" => Scale::Decimal(12),
        "P" => Scale::Decimal(15),
        "E" => Scale::Decimal(18),
        "Ki" => Scale::Binary(1),
        "Mi" => Scale::Binary(2),
        "Gi" => Scale::Binary(3),
        "Ti" => Scale::Binary(4),
        "Pi" => Scale::Binary(5),
        "Ei" => Scale::Binary(6),
        _ => {
            let exp = suffix.strip_prefix('e').or_else(|| suffix.strip_prefix('E'))?;
            Scale::Decimal(exp.parse().ok()?)
        }
    };
    Some(sc)
}

/// Parse a quantity and express it in units of `10^-shift` (shift 3 gives millis).
fn parse_scaled(s: &str, shift: i32) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (num, suffix) = split_suffix(s);
    let value: f64 = num.parse().ok()?;
    let v = match scale(suffix)? {
        Scale::Decimal(e) => value * 10f64.powi(e + shift),
        Scale::Binary(p) => value * 1024f64.powi(p) * 10f64.powi(shift),
    };
    Some(v)
}

/// Parse a quantity string into its base-unit value.
pub fn parse(s: &str) -> Option<f64> {
    parse_scaled(s, 0)
}

/// Value in thousandths, rounded up (CPU millis).
pub fn milli_value(q: Option<&Quantity>) -> i64 {
    q.and_then(|q| parse_scaled(&q.0, 3)).map(|v| v.ceil() as i64).unwrap_or(0)
}

/// Value in base units, rounded up (bytes).
pub fn value(q: Option<&Quantity>) -> i64 {
    q.and_then(|q| parse(&q.0)).map(|v| v.ceil() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    #[test]
    fn cpu_quantities() {
        assert_eq!(milli_value(Some(&q("250m"))), 250);
        assert_eq!(milli_value(Some(&q("2"))), 2000);
        assert_eq!(milli_value(Some(&q("1.5"))), 1500);
        assert_eq!(milli_value(Some(&q("100n"))), 1);
        assert_eq!(milli_value(None), 0);
    }

    #[test]
    fn memory_quantities() {
        assert_eq!(value(Some(&q("1Ki"))), 1024);
        assert_eq!(value(Some(&q("16Gi"))), 17_179_869_184);
        assert_eq!(value(Some(&q("128M"))), 128_000_000);
        assert_eq!(value(Some(&q("2e3"))), 2000);
        assert_eq!(value(Some(&q("garbage"))), 0);
    }
}
