use crate::models::MetricSummary;

/// Summarize raw values. `None` for an empty slice.
pub fn summarize(values: &[f64]) -> Option<MetricSummary> {
    if values.is_empty() {
        return None;
    }
    let sum: f64 = values.iter().sum();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let count = values.len() as i64;
    Some(MetricSummary {
        sum,
        avg: sum / count as f64,
        min,
        max,
        count,
    })
}

/// Merge finer-period summaries into one. The average is weighted by sample
/// count, so merging daily rows equals summarizing their raw values.
pub fn combine(parts: &[MetricSummary]) -> Option<MetricSummary> {
    let count: i64 = parts.iter().map(|p| p.count).sum();
    if parts.is_empty() || count == 0 {
        return None;
    }
    let sum: f64 = parts.iter().map(|p| p.sum).sum();
    Some(MetricSummary {
        sum,
        avg: sum / count as f64,
        min: parts.iter().map(|p| p.min).fold(f64::INFINITY, f64::min),
        max: parts.iter().map(|p| p.max).fold(f64::NEG_INFINITY, f64::max),
        count,
    })
}

/// Body-mass index from average weight (kg) and height (cm).
pub fn bmi(weight_kg: f64, height_cm: f64) -> Option<f64> {
    if weight_kg <= 0.0 || height_cm <= 0.0 {
        return None;
    }
    let meters = height_cm / 100.0;
    Some(weight_kg / (meters * meters))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_basic() {
        let s = summarize(&[60.0, 70.0, 80.0]).unwrap();
        assert_eq!(s.sum, 210.0);
        assert_eq!(s.avg, 70.0);
        assert_eq!(s.min, 60.0);
        assert_eq!(s.max, 80.0);
        assert_eq!(s.count, 3);
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn combine_weights_by_count() {
        let a = summarize(&[10.0]).unwrap();
        let b = summarize(&[20.0, 30.0, 40.0]).unwrap();
        let merged = combine(&[a, b]).unwrap();
        let direct = summarize(&[10.0, 20.0, 30.0, 40.0]).unwrap();
        assert_eq!(merged, direct);
        assert!(combine(&[]).is_none());
    }

    #[test]
    fn bmi_from_metric_units() {
        let v = bmi(80.0, 200.0).unwrap();
        assert!((v - 20.0).abs() < 1e-9);
        assert!(bmi(80.0, 0.0).is_none());
    }
}
