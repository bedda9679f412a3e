// Number <-> string conversions with Lua semantics.
//
// Integer-valued floats print without a fractional part. Fractional floats
// use shortest-round-trip formatting, so tonumber(tostring(n)) == n holds
// for every finite n.

/// Largest double that still prints through the integer fast path.
const INT_PRINT_LIMIT: f64 = 9.007_199_254_740_992e15; // 2^53

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    if n.floor() == n && n.abs() < INT_PRINT_LIMIT {
        let mut buf = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }
    let mut s = format!("{}", n);
    // C-style exponent: 1e300 prints as "1e+300".
    if let Some(pos) = s.find('e') {
        if s.as_bytes().get(pos + 1) != Some(&b'-') {
            s.insert(pos + 1, '+');
        }
    }
    s
}

/// Parse a Lua numeral: decimal or `0x` hexadecimal (with optional hex
/// fraction and binary exponent), surrounded by optional whitespace.
pub fn str_to_number(s: &str) -> Option<f64> {
    let s = s.trim_matches(|c: char| c.is_ascii_whitespace());
    if s.is_empty() {
        return None;
    }
    let (sign, body) = match s.as_bytes()[0] {
        b'+' => (1.0, &s[1..]),
        b'-' => (-1.0, &s[1..]),
        _ => (1.0, s),
    };
    if body.len() >= 2 && (body.starts_with("0x") || body.starts_with("0X")) {
        return parse_hex(&body[2..]).map(|n| sign * n);
    }
    // Rust's parser accepts "inf"/"nan"/"infinity"; Lua's numeral grammar
    // does not, and rejects any non-hex numeral containing 'n'/'N'.
    if body.bytes().any(|b| b == b'n' || b == b'N') || body.contains('_') {
        return None;
    }
    body.parse::<f64>().ok().map(|n| sign * n)
}

fn parse_hex(digits: &str) -> Option<f64> {
    let bytes = digits.as_bytes();
    let mut mantissa = 0.0f64;
    let mut any = false;
    let mut i = 0;
    while i < bytes.len() {
        match (bytes[i] as char).to_digit(16) {
            Some(d) => {
                mantissa = mantissa * 16.0 + d as f64;
                any = true;
                i += 1;
            }
            None => break,
        }
    }
    let mut exp = 0i32;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() {
            match (bytes[i] as char).to_digit(16) {
                Some(d) => {
                    mantissa = mantissa * 16.0 + d as f64;
                    exp -= 4;
                    any = true;
                    i += 1;
                }
                None => break,
            }
        }
    }
    if !any {
        return None;
    }
    if i < bytes.len() && (bytes[i] == b'p' || bytes[i] == b'P') {
        i += 1;
        let mut esign = 1i32;
        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            esign = if bytes[i] == b'-' { -1 } else { 1 };
            i += 1;
        }
        let mut e = 0i32;
        let mut edigits = false;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            e = e.saturating_mul(10).saturating_add((bytes[i] - b'0') as i32);
            edigits = true;
            i += 1;
        }
        if !edigits {
            return None;
        }
        exp += esign * e;
    }
    if i != bytes.len() {
        return None;
    }
    Some(mantissa * 2.0f64.powi(exp))
}

/// `tonumber(s, base)` for bases 2..=36: integer digits only.
pub fn str_to_number_base(s: &str, base: u32) -> Option<f64> {
    let s = s.trim_matches(|c: char| c.is_ascii_whitespace());
    if s.is_empty() || !(2..=36).contains(&base) {
        return None;
    }
    let (neg, body) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    if body.is_empty() {
        return None;
    }
    let mut n = 0.0f64;
    for c in body.chars() {
        let d = c.to_digit(36)?;
        if d >= base {
            return None;
        }
        n = n * base as f64 + d as f64;
    }
    Some(if neg { -n } else { n })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_print_without_fraction() {
        assert_eq!(number_to_string(42.0), "42");
        assert_eq!(number_to_string(-7.0), "-7");
        assert_eq!(number_to_string(1e6), "1000000");
        assert_eq!(number_to_string(-0.0), "-0");
    }

    #[test]
    fn fractions_round_trip() {
        for n in [0.1, 1.0 / 3.0, 1e300, -2.5e-7, f64::MIN_POSITIVE] {
            let s = number_to_string(n);
            assert_eq!(str_to_number(&s), Some(n), "round-trip of {}", s);
        }
    }

    #[test]
    fn hex_literals() {
        assert_eq!(str_to_number("0x10"), Some(16.0));
        assert_eq!(str_to_number("  0xA.8  "), Some(10.5));
        assert_eq!(str_to_number("0x1p4"), Some(16.0));
        assert_eq!(str_to_number("-0x2"), Some(-2.0));
        assert_eq!(str_to_number("0x"), None);
    }

    #[test]
    fn malformed_numerals_rejected() {
        assert_eq!(str_to_number(""), None);
        assert_eq!(str_to_number("1 2"), None);
        assert_eq!(str_to_number("0xg"), None);
        assert_eq!(str_to_number("1_0"), None);
    }

    #[test]
    fn inf_and_nan_are_not_numerals() {
        assert_eq!(str_to_number("nan"), None);
        assert_eq!(str_to_number("NaN"), None);
        assert_eq!(str_to_number("inf"), None);
        assert_eq!(str_to_number("-inf"), None);
        assert_eq!(str_to_number("+inf"), None);
        assert_eq!(str_to_number("infinity"), None);
    }

    #[test]
    fn explicit_base() {
        assert_eq!(str_to_number_base("ff", 16), Some(255.0));
        assert_eq!(str_to_number_base("101", 2), Some(5.0));
        assert_eq!(str_to_number_base("z", 36), Some(35.0));
        assert_eq!(str_to_number_base("2", 2), None);
    }
}
