use crate::session::ViewerDataPoint;

/// Coarse classification of viewer-count momentum over a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Growing,
    Steady,
    Dropping,
}

/// Relative change between the half means beyond which the trend is no
/// longer considered steady.
const TREND_THRESHOLD: f64 = 0.07;

/// Truncating integer mean of all recorded counts, 0 for an empty history.
pub fn average(history: &[ViewerDataPoint]) -> u64 {
    if history.is_empty() {
        return 0;
    }
    let sum: u64 = history.iter().map(|p| p.count).sum();
    sum / history.len() as u64
}

/// Highest recorded count, 0 for an empty history.
pub fn peak(history: &[ViewerDataPoint]) -> u64 {
    history.iter().map(|p| p.count).max().unwrap_or(0)
}

/// Compares the mean of the early half of the history against the late half.
/// Fewer than 4 samples carry no signal, so no classification is reported
/// and callers omit the trend text entirely.
pub fn trend(history: &[ViewerDataPoint]) -> Option<Trend> {
    if history.len() < 4 {
        return None;
    }

    let mid = history.len() / 2;
    let early = mean(&history[..mid]);
    let late = mean(&history[mid..]);

    // The relative change is undefined when the early half averages zero:
    // any audience at all counts as growth.
    if early == 0.0 {
        return Some(if late > 0.0 { Trend::Growing } else { Trend::Steady });
    }

    let diff = (late - early) / early;
    Some(if diff > TREND_THRESHOLD {
        Trend::Growing
    } else if diff < -TREND_THRESHOLD {
        Trend::Dropping
    } else {
        Trend::Steady
    })
}

fn mean(points: &[ViewerDataPoint]) -> f64 {
    let sum: u64 = points.iter().map(|p| p.count).sum();
    sum as f64 / points.len() as f64
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn points(counts: &[u64]) -> Vec<ViewerDataPoint> {
        let now = Utc::now();
        counts
            .iter()
            .map(|&count| ViewerDataPoint {
                timestamp: now,
                count,
            })
            .collect()
    }

    #[test]
    fn average_of_empty_history_is_zero() {
        assert_eq!(average(&points(&[])), 0);
    }

    #[test]
    fn average_of_single_point() {
        assert_eq!(average(&points(&[5])), 5);
    }

    #[test]
    fn average_truncates_toward_zero() {
        assert_eq!(average(&points(&[10, 20, 30])), 20);
        assert_eq!(average(&points(&[1, 2])), 1);
    }

    #[test]
    fn peak_is_order_independent() {
        assert_eq!(peak(&points(&[3, 9, 1, 9, 2])), 9);
        assert_eq!(peak(&points(&[9, 3, 2, 1])), 9);
        assert_eq!(peak(&points(&[])), 0);
    }

    #[test]
    fn short_histories_have_no_trend() {
        assert_eq!(trend(&points(&[])), None);
        assert_eq!(trend(&points(&[10])), None);
        assert_eq!(trend(&points(&[10, 20, 30])), None);
    }

    #[test]
    fn trend_grows_when_late_half_pulls_ahead() {
        // early mean 10, late mean 100, relative change 9.0
        assert_eq!(
            trend(&points(&[10, 10, 10, 10, 100, 100, 100, 100])),
            Some(Trend::Growing)
        );
    }

    #[test]
    fn trend_drops_when_late_half_falls_behind() {
        // relative change -0.5
        assert_eq!(trend(&points(&[100, 100, 50, 50])), Some(Trend::Dropping));
    }

    #[test]
    fn trend_is_steady_within_the_threshold() {
        // relative change 0 within ±0.07
        assert_eq!(trend(&points(&[10, 10, 11, 9])), Some(Trend::Steady));
    }

    #[test]
    fn odd_length_splits_give_the_floor_half_to_early() {
        // early = [10, 10], late = [10, 100, 100]: relative change 6.0
        assert_eq!(
            trend(&points(&[10, 10, 10, 100, 100])),
            Some(Trend::Growing)
        );
    }

    #[test]
    fn zero_early_mean_never_divides() {
        assert_eq!(trend(&points(&[0, 0, 5, 5])), Some(Trend::Growing));
        assert_eq!(trend(&points(&[0, 0, 0, 0])), Some(Trend::Steady));
    }
}
