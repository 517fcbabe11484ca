use crate::types::{BuildingAttributes, ViabilityPolicy};

/// How a building height was obtained. Map data is often incomplete, so
/// resolution always produces a value; the variant records which rule applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeightEstimate {
    Explicit(f64),
    FromLevels { levels: f64, height: f64 },
    Default(f64),
}

impl HeightEstimate {
    pub fn resolve(attributes: &BuildingAttributes, policy: &ViabilityPolicy) -> Self {
        if let Some(height) = attributes.height.as_deref().and_then(parse_height) {
            return HeightEstimate::Explicit(height);
        }
        if let Some(levels) = attributes.levels.as_deref().and_then(parse_number) {
            let height = levels * policy.floor_height_m;
            if height.is_finite() {
                return HeightEstimate::FromLevels { levels, height };
            }
        }
        HeightEstimate::Default(policy.default_height_m)
    }

    pub fn meters(&self) -> f64 {
        match *self {
            HeightEstimate::Explicit(height) => height,
            HeightEstimate::FromLevels { height, .. } => height,
            HeightEstimate::Default(height) => height,
        }
    }
}

/// Accepts "12", "12.5", "12m" and "12 m".
fn parse_height(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let value = trimmed.strip_suffix('m').unwrap_or(trimmed);
    parse_number(value)
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(height: Option<&str>, levels: Option<&str>) -> BuildingAttributes {
        BuildingAttributes {
            height: height.map(str::to_string),
            levels: levels.map(str::to_string),
        }
    }

    #[test]
    fn explicit_height_wins_over_levels() {
        let estimate = HeightEstimate::resolve(&attrs(Some("12"), Some("5")), &ViabilityPolicy::default());
        assert_eq!(estimate, HeightEstimate::Explicit(12.0));
    }

    #[test]
    fn levels_multiply_by_floor_height() {
        let estimate = HeightEstimate::resolve(&attrs(None, Some("2")), &ViabilityPolicy::default());
        assert_eq!(
            estimate,
            HeightEstimate::FromLevels {
                levels: 2.0,
                height: 7.0
            }
        );
        assert_eq!(estimate.meters(), 7.0);
    }

    #[test]
    fn missing_attributes_fall_back_to_default() {
        let estimate = HeightEstimate::resolve(&attrs(None, None), &ViabilityPolicy::default());
        assert_eq!(estimate, HeightEstimate::Default(10.0));
    }

    #[test]
    fn unit_suffix_is_stripped() {
        let policy = ViabilityPolicy::default();
        assert_eq!(HeightEstimate::resolve(&attrs(Some("15m"), None), &policy).meters(), 15.0);
        assert_eq!(HeightEstimate::resolve(&attrs(Some(" 8.5 m "), None), &policy).meters(), 8.5);
    }

    #[test]
    fn malformed_values_fall_through_silently() {
        let policy = ViabilityPolicy::default();
        let estimate = HeightEstimate::resolve(&attrs(Some("tall"), Some("3")), &policy);
        assert_eq!(estimate.meters(), 10.5);
        let estimate = HeightEstimate::resolve(&attrs(Some("12 ft"), Some("two")), &policy);
        assert_eq!(estimate, HeightEstimate::Default(10.0));
        let estimate = HeightEstimate::resolve(&attrs(Some("NaN"), None), &policy);
        assert_eq!(estimate, HeightEstimate::Default(10.0));
    }

    #[test]
    fn policy_overrides_floor_and_default_heights() {
        let policy = ViabilityPolicy {
            floor_height_m: 3.0,
            default_height_m: 6.0,
            ..ViabilityPolicy::default()
        };
        assert_eq!(HeightEstimate::resolve(&attrs(None, Some("4")), &policy).meters(), 12.0);
        assert_eq!(HeightEstimate::resolve(&attrs(None, None), &policy).meters(), 6.0);
    }
}
