//! Parsers for numeric tag values used by profiles

use super::EvaluationError;

const MPH_TO_KMH: f64 = 1.609344;
const KNOTS_TO_KMH: f64 = 1.852;

/// Parse a `maxspeed` value into km/h
///
/// Symbolic values (`none`, `signals`, `DE:urban`, ...) yield `Ok(None)`.
/// A numeric value that is zero or negative is an error.
pub fn parse_maxspeed(value: &str) -> Result<Option<f64>, EvaluationError> {
    let value = value.trim().to_ascii_lowercase();
    let (negative, rest) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.as_str()),
    };

    let number_len = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    if number_len == 0 {
        return Ok(None);
    }

    let number: f64 = match rest[..number_len].parse() {
        Ok(n) => n,
        Err(_) => {
            return Err(EvaluationError::InvalidValue {
                tag: "maxspeed",
                value: value.clone(),
            })
        }
    };

    let factor = match rest[number_len..].trim() {
        "" | "km/h" | "kmh" | "kph" => 1.0,
        "mph" => MPH_TO_KMH,
        "knots" => KNOTS_TO_KMH,
        _ => return Ok(None),
    };

    let signed = if negative { -number } else { number };
    let kmh = signed * factor;
    if !kmh.is_finite() || kmh <= 0.0 {
        return Err(EvaluationError::InvalidSpeed(kmh));
    }
    Ok(Some(kmh))
}

/// Parse a `duration` value into seconds
///
/// Accepts `MM`, `HH:MM`, `HH:MM:SS` and ISO 8601 `P[nD]T[nH][nM][nS]`.
pub fn parse_duration(value: &str) -> Result<f64, EvaluationError> {
    let trimmed = value.trim();
    let invalid = || EvaluationError::InvalidValue {
        tag: "duration",
        value: value.to_string(),
    };

    let seconds = if let Some(iso) = trimmed.strip_prefix('P') {
        parse_iso_duration(iso).ok_or_else(invalid)?
    } else {
        let parts: Vec<&str> = trimmed.split(':').collect();
        let numbers: Option<Vec<u64>> = parts
            .iter()
            .map(|p| {
                if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) {
                    p.parse().ok()
                } else {
                    None
                }
            })
            .collect();
        let (hours, minutes, secs) = match numbers.as_deref() {
            Some(&[minutes]) => (0, minutes, 0),
            Some(&[hours, minutes]) => (hours, minutes, 0),
            Some(&[hours, minutes, secs]) => (hours, minutes, secs),
            _ => return Err(invalid()),
        };
        hours
            .checked_mul(3600)
            .and_then(|h| minutes.checked_mul(60)?.checked_add(h))
            .and_then(|t| t.checked_add(secs))
            .ok_or_else(invalid)?
    };

    if seconds == 0 {
        return Err(invalid());
    }
    Ok(seconds as f64)
}

fn parse_iso_duration(s: &str) -> Option<u64> {
    let mut total = 0u64;
    let mut number = String::new();
    let mut in_time = false;
    let mut seen_unit = false;

    for c in s.chars() {
        match c {
            '0'..='9' => number.push(c),
            'T' if !in_time && number.is_empty() => in_time = true,
            'D' | 'H' | 'M' | 'S' => {
                let n: u64 = number.parse().ok()?;
                number.clear();
                let unit = match (c, in_time) {
                    ('D', false) => 86_400,
                    ('H', true) => 3600,
                    ('M', true) => 60,
                    ('S', true) => 1,
                    _ => return None,
                };
                total = n.checked_mul(unit)?.checked_add(total)?;
                seen_unit = true;
            }
            _ => return None,
        }
    }

    if !number.is_empty() || !seen_unit {
        return None;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maxspeed_units() {
        assert_eq!(parse_maxspeed("50"), Ok(Some(50.0)));
        assert_eq!(parse_maxspeed("90 km/h"), Ok(Some(90.0)));
        let mph = parse_maxspeed("30 mph").unwrap().unwrap();
        assert!((mph - 48.28032).abs() < 1e-6);
        let knots = parse_maxspeed("10 knots").unwrap().unwrap();
        assert!((knots - 18.52).abs() < 1e-9);
    }

    #[test]
    fn test_maxspeed_symbolic_values_are_ignored() {
        assert_eq!(parse_maxspeed("none"), Ok(None));
        assert_eq!(parse_maxspeed("signals"), Ok(None));
        assert_eq!(parse_maxspeed("BE:urban"), Ok(None));
        assert_eq!(parse_maxspeed("50;30"), Ok(None));
    }

    #[test]
    fn test_maxspeed_non_positive_is_error() {
        assert_eq!(parse_maxspeed("0"), Err(EvaluationError::InvalidSpeed(0.0)));
        assert_eq!(
            parse_maxspeed("-20"),
            Err(EvaluationError::InvalidSpeed(-20.0))
        );
        assert!(parse_maxspeed("5.5.5").is_err());
    }

    #[test]
    fn test_duration_clock_formats() {
        assert_eq!(parse_duration("45"), Ok(2700.0));
        assert_eq!(parse_duration("01:30"), Ok(5400.0));
        assert_eq!(parse_duration("0:00:20"), Ok(20.0));
    }

    #[test]
    fn test_duration_iso_format() {
        assert_eq!(parse_duration("PT1H30M"), Ok(5400.0));
        assert_eq!(parse_duration("PT45S"), Ok(45.0));
        assert_eq!(parse_duration("P1DT1H"), Ok(90_000.0));
    }

    #[test]
    fn test_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("1:2:3:4").is_err());
        assert!(parse_duration("PT").is_err());
        assert!(parse_duration("PT5").is_err());
        assert!(parse_duration("P5H").is_err());
        assert!(parse_duration("00:00").is_err());
    }

    #[test]
    fn test_duration_overflow_is_error() {
        assert!(parse_duration("99999999999999999:00").is_err());
        assert!(parse_duration("18446744073709551615").is_err());
        assert!(parse_duration("PT99999999999999999H").is_err());
        assert!(parse_duration("P99999999999999DT1S").is_err());
    }
}
