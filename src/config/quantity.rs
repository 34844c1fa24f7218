//! Memory quantity parsing.
//!
//! Two notations are accepted, matching what each substrate understands:
//! Kubernetes resource quantities (`512Mi`, `1G`, `129e6`) for the cluster
//! backend and human-readable RAM sizes (`512m`, `2GB`) for Docker.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ConfigError;

static KUBE_QUANTITY: OnceLock<Regex> = OnceLock::new();
static RAM_SIZE: OnceLock<Regex> = OnceLock::new();

fn kube_quantity_regex() -> &'static Regex {
    KUBE_QUANTITY.get_or_init(|| {
        Regex::new(r"^(\d+\.?\d*|\.\d+)(Ki|Mi|Gi|Ti|Pi|Ei|[mkMGTPE]|[eE][+-]?\d+)?$")
            .expect("quantity pattern is valid")
    })
}

fn ram_size_regex() -> &'static Regex {
    RAM_SIZE.get_or_init(|| {
        Regex::new(r"(?i)^(\d+(?:\.\d+)?)\s?(?:([kmgtp])i?)?b?$")
            .expect("size pattern is valid")
    })
}

/// Validates a non-negative Kubernetes resource quantity and returns it
/// unchanged.
pub fn parse_kube_quantity(key: &str, value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    if kube_quantity_regex().is_match(value) {
        Ok(value.to_string())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("'{value}' is not a valid resource quantity"),
        })
    }
}

/// Value of a Kubernetes quantity in base units, e.g. `1Ki` is `1024.0`.
///
/// Returns `None` for anything [`parse_kube_quantity`] rejects.
pub fn kube_quantity_value(value: &str) -> Option<f64> {
    let caps = kube_quantity_regex().captures(value.trim())?;
    let number: f64 = caps[1].parse().ok()?;

    let scale = match caps.get(2).map(|m| m.as_str()) {
        None => 1.0,
        Some("Ki") => 2f64.powi(10),
        Some("Mi") => 2f64.powi(20),
        Some("Gi") => 2f64.powi(30),
        Some("Ti") => 2f64.powi(40),
        Some("Pi") => 2f64.powi(50),
        Some("Ei") => 2f64.powi(60),
        Some("m") => 1e-3,
        Some("k") => 1e3,
        Some("M") => 1e6,
        Some("G") => 1e9,
        Some("T") => 1e12,
        Some("P") => 1e15,
        Some("E") => 1e18,
        Some(exponent) => 10f64.powi(exponent[1..].parse().ok()?),
    };
    Some(number * scale)
}

/// Parses a human-readable RAM size into bytes using binary multiples.
///
/// `512m`, `512MB`, `512MiB` and `512 m` all mean 512 * 1024 * 1024.
/// A bare number is a byte count.
pub fn parse_ram_bytes(key: &str, value: &str) -> Result<i64, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("'{value}' is not a valid memory size"),
    };

    let caps = ram_size_regex().captures(value.trim()).ok_or_else(invalid)?;
    let number: f64 = caps[1].parse().map_err(|_| invalid())?;

    let multiplier: f64 = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        None => 1.0,
        Some(unit) => match unit.as_str() {
            "k" => 1024.0,
            "m" => 1024.0 * 1024.0,
            "g" => 1024.0 * 1024.0 * 1024.0,
            "t" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
            "p" => 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0,
            _ => return Err(invalid()),
        },
    };

    let bytes = number * multiplier;
    if !bytes.is_finite() || bytes > i64::MAX as f64 {
        return Err(invalid());
    }

    Ok(bytes as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kube_quantities() {
        for ok in ["128974848", "129e6", "129M", "123Mi", "0.5Gi", "1G", ".5Gi", "500m"] {
            assert_eq!(parse_kube_quantity("memory_limit", ok).unwrap(), ok);
        }
        for bad in ["", "Gi", "1 Gi", "1GB", "one", "-512Mi", "+1Gi"] {
            assert!(
                parse_kube_quantity("memory_limit", bad).is_err(),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_kube_quantity_value() {
        assert_eq!(kube_quantity_value("128974848"), Some(128974848.0));
        assert_eq!(kube_quantity_value("129e6"), Some(129e6));
        assert_eq!(kube_quantity_value("1Ki"), Some(1024.0));
        assert_eq!(kube_quantity_value("0.5Gi"), Some(512.0 * 1024.0 * 1024.0));
        assert_eq!(kube_quantity_value("1G"), Some(1e9));
        assert_eq!(kube_quantity_value("500m"), Some(0.5));
        assert_eq!(kube_quantity_value("-1Gi"), None);
    }

    #[test]
    fn test_ram_bytes() {
        assert_eq!(parse_ram_bytes("memory_limit", "1024").unwrap(), 1024);
        assert_eq!(parse_ram_bytes("memory_limit", "512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_ram_bytes("memory_limit", "512MB").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_ram_bytes("memory_limit", "512MiB").unwrap(), 512 * 1024 * 1024);
        assert_eq!(
            parse_ram_bytes("memory_limit", "1.5g").unwrap(),
            3 * 512 * 1024 * 1024
        );
        assert_eq!(
            parse_ram_bytes("memory_limit", "2 GB").unwrap(),
            2 * 1024 * 1024 * 1024
        );
    }

    #[test]
    fn test_ram_bytes_invalid() {
        for bad in ["", "lots", "12x", "-5m", "1.2.3g"] {
            let err = parse_ram_bytes("memory_limit", bad).unwrap_err();
            assert!(err.to_string().contains("memory_limit"));
        }
    }
}
